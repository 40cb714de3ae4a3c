//! Datum — 단일 관측값과 마지막 갱신 시각
//!
//! 모든 변경(inc_by, set, observe)은 하나의 락 아래에서 값과 시각을
//! 함께 갱신하므로, 동시 독자는 항상 일관된 (값, 시각) 쌍을 관측합니다.
//! 히스토그램의 (sum, count, buckets) 삼중항도 관측 단위로 일관됩니다.

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::error::MetricsError;

/// Datum의 판별 변형
#[derive(Debug, Clone, PartialEq)]
pub enum DatumValue {
    /// 정수 값 (Counter, Gauge, Timer)
    Int(i64),
    /// 부동소수점 값 (Gauge)
    Float(f64),
    /// 문자열 값 (Text)
    Text(String),
    /// 히스토그램 버킷
    Buckets(Buckets),
}

impl DatumValue {
    /// 변형 이름을 반환합니다 (에러 메시지용).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Buckets(_) => "buckets",
        }
    }
}

impl fmt::Display for DatumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Buckets(b) => write!(f, "count={} sum={}", b.count, b.sum),
        }
    }
}

/// 히스토그램 버킷 상태
///
/// `bounds`는 오름차순 상한 목록이며, `counts`는 `bounds.len() + 1`개로
/// 마지막 원소가 +∞ 버킷입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Buckets {
    /// 버킷 상한 (오름차순)
    pub bounds: Vec<f64>,
    /// 버킷별 관측 수. 마지막 원소는 +∞ 버킷.
    pub counts: Vec<u64>,
    /// 관측값 합
    pub sum: f64,
    /// 전체 관측 수
    pub count: u64,
}

impl Buckets {
    /// 주어진 상한으로 빈 버킷 상태를 생성합니다.
    ///
    /// 상한은 정렬되어 있어야 하며, 정렬되지 않은 입력은 정렬합니다.
    pub fn new(mut bounds: Vec<f64>) -> Self {
        bounds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let counts = vec![0; bounds.len() + 1];
        Self {
            bounds,
            counts,
            sum: 0.0,
            count: 0,
        }
    }

    /// 관측값 하나를 기록합니다.
    ///
    /// 상한이 `x` 이상인 가장 작은 버킷의 카운트를 증가시키고,
    /// 해당 버킷이 없으면 +∞ 버킷을 증가시킵니다.
    fn observe(&mut self, x: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|bound| *bound >= x)
            .unwrap_or(self.bounds.len());
        self.counts[idx] += 1;
        self.sum += x;
        self.count += 1;
    }
}

/// 값과 시각을 함께 보호하는 내부 셀
#[derive(Debug)]
struct Cell {
    value: DatumValue,
    time: DateTime<Utc>,
}

/// 단일 관측값과 마지막 갱신 시각
///
/// 메트릭의 LabelValue가 소유하며, VM과 익스포터가 동시에 접근합니다.
#[derive(Debug)]
pub struct Datum {
    cell: RwLock<Cell>,
}

impl Datum {
    fn with_value(value: DatumValue) -> Self {
        Self {
            cell: RwLock::new(Cell {
                value,
                time: Utc::now(),
            }),
        }
    }

    /// 0으로 초기화된 정수 Datum을 생성합니다.
    pub fn new_int() -> Self {
        Self::with_value(DatumValue::Int(0))
    }

    /// 0.0으로 초기화된 부동소수점 Datum을 생성합니다.
    pub fn new_float() -> Self {
        Self::with_value(DatumValue::Float(0.0))
    }

    /// 빈 문자열로 초기화된 텍스트 Datum을 생성합니다.
    pub fn new_text() -> Self {
        Self::with_value(DatumValue::Text(String::new()))
    }

    /// 주어진 상한으로 히스토그램 Datum을 생성합니다.
    pub fn new_buckets(bounds: Vec<f64>) -> Self {
        Self::with_value(DatumValue::Buckets(Buckets::new(bounds)))
    }

    /// 복원된 값과 시각으로 Datum을 생성합니다 (역직렬화용).
    pub fn restore(value: DatumValue, time: DateTime<Utc>) -> Self {
        Self {
            cell: RwLock::new(Cell { value, time }),
        }
    }

    /// 정수 Datum을 `delta`만큼 증가시킵니다.
    ///
    /// 음수 증가는 [`MetricsError::NegativeCounterIncrement`]로 거부합니다.
    /// 갱신 후 값을 반환합니다.
    pub fn inc_by(&self, delta: i64, ts: DateTime<Utc>) -> Result<i64, MetricsError> {
        if delta < 0 {
            return Err(MetricsError::NegativeCounterIncrement(delta));
        }
        let mut cell = self.cell.write().expect("datum lock poisoned");
        match &mut cell.value {
            DatumValue::Int(v) => {
                *v = v.saturating_add(delta);
                let out = *v;
                cell.time = ts;
                Ok(out)
            }
            other => Err(MetricsError::DatumTypeMismatch {
                expected: "int",
                got: other.type_name(),
            }),
        }
    }

    /// 정수 Datum의 값을 덮어씁니다.
    pub fn set_int(&self, v: i64, ts: DateTime<Utc>) -> Result<(), MetricsError> {
        let mut cell = self.cell.write().expect("datum lock poisoned");
        match &mut cell.value {
            DatumValue::Int(slot) => {
                *slot = v;
                cell.time = ts;
                Ok(())
            }
            other => Err(MetricsError::DatumTypeMismatch {
                expected: "int",
                got: other.type_name(),
            }),
        }
    }

    /// 부동소수점 Datum을 `delta`만큼 증가시킵니다.
    pub fn inc_by_float(&self, delta: f64, ts: DateTime<Utc>) -> Result<(), MetricsError> {
        let mut cell = self.cell.write().expect("datum lock poisoned");
        match &mut cell.value {
            DatumValue::Float(v) => {
                *v += delta;
                cell.time = ts;
                Ok(())
            }
            other => Err(MetricsError::DatumTypeMismatch {
                expected: "float",
                got: other.type_name(),
            }),
        }
    }

    /// 부동소수점 Datum의 값을 덮어씁니다.
    pub fn set_float(&self, v: f64, ts: DateTime<Utc>) -> Result<(), MetricsError> {
        let mut cell = self.cell.write().expect("datum lock poisoned");
        match &mut cell.value {
            DatumValue::Float(slot) => {
                *slot = v;
                cell.time = ts;
                Ok(())
            }
            other => Err(MetricsError::DatumTypeMismatch {
                expected: "float",
                got: other.type_name(),
            }),
        }
    }

    /// 텍스트 Datum의 값을 덮어씁니다.
    pub fn set_text(&self, v: impl Into<String>, ts: DateTime<Utc>) -> Result<(), MetricsError> {
        let mut cell = self.cell.write().expect("datum lock poisoned");
        match &mut cell.value {
            DatumValue::Text(slot) => {
                *slot = v.into();
                cell.time = ts;
                Ok(())
            }
            other => Err(MetricsError::DatumTypeMismatch {
                expected: "text",
                got: other.type_name(),
            }),
        }
    }

    /// 히스토그램 Datum에 관측값 하나를 기록합니다.
    pub fn observe(&self, x: f64, ts: DateTime<Utc>) -> Result<(), MetricsError> {
        let mut cell = self.cell.write().expect("datum lock poisoned");
        match &mut cell.value {
            DatumValue::Buckets(b) => {
                b.observe(x);
                cell.time = ts;
                Ok(())
            }
            other => Err(MetricsError::DatumTypeMismatch {
                expected: "buckets",
                got: other.type_name(),
            }),
        }
    }

    /// 일관된 (값, 시각) 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> (DatumValue, DateTime<Utc>) {
        let cell = self.cell.read().expect("datum lock poisoned");
        (cell.value.clone(), cell.time)
    }

    /// 현재 값만 복제하여 반환합니다.
    pub fn value(&self) -> DatumValue {
        self.snapshot().0
    }

    /// 마지막 갱신 시각을 반환합니다.
    pub fn time(&self) -> DateTime<Utc> {
        self.snapshot().1
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_by_accumulates() {
        let d = Datum::new_int();
        let ts = Utc::now();
        assert_eq!(d.inc_by(1, ts).unwrap(), 1);
        assert_eq!(d.inc_by(2, ts).unwrap(), 3);
        assert_eq!(d.value(), DatumValue::Int(3));
    }

    #[test]
    fn negative_increment_is_rejected() {
        let d = Datum::new_int();
        let err = d.inc_by(-1, Utc::now()).unwrap_err();
        assert!(matches!(err, MetricsError::NegativeCounterIncrement(-1)));
        // 값은 변하지 않음
        assert_eq!(d.value(), DatumValue::Int(0));
    }

    #[test]
    fn inc_by_on_text_datum_fails() {
        let d = Datum::new_text();
        let err = d.inc_by(1, Utc::now()).unwrap_err();
        assert!(matches!(err, MetricsError::DatumTypeMismatch { .. }));
    }

    #[test]
    fn set_overwrites_value_and_time() {
        let d = Datum::new_int();
        let t1 = Utc::now();
        d.set_int(37, t1).unwrap();
        let (value, time) = d.snapshot();
        assert_eq!(value, DatumValue::Int(37));
        assert_eq!(time, t1);

        let t2 = t1 + chrono::Duration::seconds(5);
        d.set_int(12, t2).unwrap();
        let (value, time) = d.snapshot();
        assert_eq!(value, DatumValue::Int(12));
        assert_eq!(time, t2);
    }

    #[test]
    fn observe_picks_smallest_covering_bucket() {
        let d = Datum::new_buckets(vec![1.0, 5.0, 10.0]);
        let ts = Utc::now();
        d.observe(0.5, ts).unwrap(); // -> bound 1.0
        d.observe(1.0, ts).unwrap(); // -> bound 1.0 (경계 포함)
        d.observe(7.0, ts).unwrap(); // -> bound 10.0
        d.observe(99.0, ts).unwrap(); // -> +∞

        match d.value() {
            DatumValue::Buckets(b) => {
                assert_eq!(b.counts, vec![2, 0, 1, 1]);
                assert_eq!(b.count, 4);
                assert!((b.sum - 107.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected datum value: {other:?}"),
        }
    }

    #[test]
    fn observe_with_no_bounds_uses_infinity_bucket() {
        let d = Datum::new_buckets(vec![]);
        d.observe(42.0, Utc::now()).unwrap();
        match d.value() {
            DatumValue::Buckets(b) => {
                assert_eq!(b.counts, vec![1]);
                assert_eq!(b.count, 1);
            }
            other => panic!("unexpected datum value: {other:?}"),
        }
    }

    #[test]
    fn buckets_sorts_unordered_bounds() {
        let b = Buckets::new(vec![10.0, 1.0, 5.0]);
        assert_eq!(b.bounds, vec![1.0, 5.0, 10.0]);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        use std::sync::Arc;

        let d = Arc::new(Datum::new_int());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let d = Arc::clone(&d);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    d.inc_by(1, Utc::now()).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(d.value(), DatumValue::Int(8000));
    }

    #[test]
    fn snapshot_is_consistent_pair() {
        let d = Datum::new_int();
        let ts = Utc::now();
        d.set_int(7, ts).unwrap();
        let (value, time) = d.snapshot();
        assert_eq!(value, DatumValue::Int(7));
        assert_eq!(time, ts);
    }
}
