//! Metric — 레이블 차원 메트릭과 JSON 직렬화
//!
//! 메트릭은 `(program, name)`으로 식별되며, 선언된 레이블 키 수와
//! 정확히 같은 수의 레이블 값 튜플로 [`Datum`]을 인덱싱합니다.
//! 레이블 값 집합은 단조 증가합니다 -- `get_datum`이 지연 생성하며,
//! 메트릭 수명 동안 삭제되지 않습니다.
//!
//! # JSON 계약
//!
//! ```json
//! {
//!   "Name": "errs", "Program": "prog", "Kind": "counter", "Keys": ["host"],
//!   "LabelValues": [
//!     {"Labels": ["a"], "Value": {"Value": 1, "Time": "2026-01-15T12:00:00.000000001Z"}}
//!   ]
//! }
//! ```
//!
//! `from_json(to_json(m)) == m`이 모든 메트릭에 대해 성립합니다.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::datum::{Buckets, Datum, DatumValue};
use crate::error::MetricsError;

/// 메트릭 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 단조 증가 카운터
    Counter,
    /// 임의 설정 게이지
    Gauge,
    /// 시각/간격 값 (정수 나노초)
    Timer,
    /// 버킷 히스토그램
    Histogram,
    /// 문자열 값
    Text,
}

impl Kind {
    /// 소문자 태그를 반환합니다 (JSON 직렬화용).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timer => "timer",
            Self::Histogram => "histogram",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            "timer" => Ok(Self::Timer),
            "histogram" => Ok(Self::Histogram),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown metric kind '{other}'")),
        }
    }
}

/// 메트릭이 선언된 소스 위치 (진단용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// 프로그램 파일 이름
    #[serde(rename = "File")]
    pub file: String,
    /// 선언 라인 번호
    #[serde(rename = "Line")]
    pub line: u32,
}

fn labels_match<S: AsRef<str>>(stored: &[String], query: &[S]) -> bool {
    stored.len() == query.len()
        && stored
            .iter()
            .zip(query.iter())
            .all(|(a, b)| a == b.as_ref())
}

/// 레이블 값 튜플과 Datum의 바인딩
#[derive(Debug)]
pub struct LabelValue {
    /// 레이블 값 (길이는 항상 선언된 키 수와 같음)
    pub labels: Vec<String>,
    /// 소유한 Datum
    pub datum: Arc<Datum>,
}

/// 레이블 차원 메트릭
///
/// 불변 메타데이터(이름, 종류, 키)와 가변 LabelValue 집합으로
/// 구성됩니다. LabelValue 삽입은 배타적이고, 기존 Datum 갱신은
/// Datum 자체의 동기화로 보호됩니다.
#[derive(Debug)]
pub struct Metric {
    /// 메트릭 이름
    pub name: String,
    /// 소속 프로그램 이름
    pub program: String,
    /// 메트릭 종류
    pub kind: Kind,
    /// 선언된 레이블 키 (n ≥ 0)
    pub keys: Vec<String>,
    /// 선언 위치 (진단용)
    pub source: Option<Source>,
    /// 히스토그램 버킷 상한 (Histogram 전용, 비면 +∞ 버킷만)
    bucket_bounds: Vec<f64>,
    /// 레이블 값 집합 (단조 증가)
    label_values: RwLock<Vec<LabelValue>>,
}

impl Metric {
    /// 새 메트릭을 생성합니다.
    pub fn new(
        program: impl Into<String>,
        name: impl Into<String>,
        kind: Kind,
        keys: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            kind,
            keys,
            source: None,
            bucket_bounds: Vec::new(),
            label_values: RwLock::new(Vec::new()),
        }
    }

    /// 선언 위치를 설정합니다.
    pub fn with_source(mut self, file: impl Into<String>, line: u32) -> Self {
        self.source = Some(Source {
            file: file.into(),
            line,
        });
        self
    }

    /// 히스토그램 버킷 상한을 설정합니다.
    pub fn with_buckets(mut self, bounds: Vec<f64>) -> Self {
        self.bucket_bounds = bounds;
        self
    }

    /// 히스토그램 버킷 상한을 반환합니다.
    pub fn bucket_bounds(&self) -> &[f64] {
        &self.bucket_bounds
    }

    /// 종류에 맞는 새 Datum을 생성합니다.
    fn new_datum(&self) -> Datum {
        match self.kind {
            Kind::Counter | Kind::Gauge | Kind::Timer => Datum::new_int(),
            Kind::Histogram => Datum::new_buckets(self.bucket_bounds.clone()),
            Kind::Text => Datum::new_text(),
        }
    }

    /// 레이블 값 튜플에 대응하는 Datum을 반환합니다.
    ///
    /// 없으면 지연 생성합니다. 레이블 수가 선언된 키 수와 다르면
    /// [`MetricsError::WrongLabelArity`]를 반환하며, panic하지 않습니다.
    pub fn get_datum<S: AsRef<str>>(&self, labels: &[S]) -> Result<Arc<Datum>, MetricsError> {
        if labels.len() != self.keys.len() {
            return Err(MetricsError::WrongLabelArity {
                expected: self.keys.len(),
                got: labels.len(),
            });
        }

        if let Some(datum) = self.lookup(labels) {
            return Ok(datum);
        }

        let mut values = self.label_values.write().expect("metric lock poisoned");
        // 쓰기 락 획득 사이에 다른 스레드가 삽입했을 수 있음
        if let Some(lv) = values.iter().find(|lv| labels_match(&lv.labels, labels)) {
            return Ok(Arc::clone(&lv.datum));
        }
        let datum = Arc::new(self.new_datum());
        values.push(LabelValue {
            labels: labels.iter().map(|s| s.as_ref().to_owned()).collect(),
            datum: Arc::clone(&datum),
        });
        Ok(datum)
    }

    /// 레이블 값 튜플에 대응하는 Datum을 찾습니다. 없으면 `None`.
    ///
    /// 레이블 수가 맞지 않아도 `None`을 반환합니다 (생성하지 않음).
    pub fn find_label_value<S: AsRef<str>>(&self, labels: &[S]) -> Option<Arc<Datum>> {
        if labels.len() != self.keys.len() {
            return None;
        }
        self.lookup(labels)
    }

    fn lookup<S: AsRef<str>>(&self, labels: &[S]) -> Option<Arc<Datum>> {
        let values = self.label_values.read().expect("metric lock poisoned");
        values
            .iter()
            .find(|lv| labels_match(&lv.labels, labels))
            .map(|lv| Arc::clone(&lv.datum))
    }

    /// 모든 레이블 집합을 순회하며 콜백을 호출합니다.
    ///
    /// 각 호출은 `키 -> 값` 맵과 해당 Datum의 일관된 스냅샷을 받습니다.
    pub fn emit_label_sets<F>(&self, mut f: F)
    where
        F: FnMut(HashMap<String, String>, (DatumValue, DateTime<Utc>)),
    {
        let values = self.label_values.read().expect("metric lock poisoned");
        for lv in values.iter() {
            let labels: HashMap<String, String> = self
                .keys
                .iter()
                .cloned()
                .zip(lv.labels.iter().cloned())
                .collect();
            f(labels, lv.datum.snapshot());
        }
    }

    /// 현재 레이블 값 수를 반환합니다.
    pub fn label_value_count(&self) -> usize {
        self.label_values.read().expect("metric lock poisoned").len()
    }

    /// 메트릭을 JSON 문자열로 직렬화합니다.
    pub fn to_json(&self) -> Result<String, MetricsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// JSON 바이트에서 메트릭을 복원합니다.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MetricsError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.program != other.program
            || self.kind != other.kind
            || self.keys != other.keys
            || self.source != other.source
            || self.bucket_bounds != other.bucket_bounds
        {
            return false;
        }
        let a = self.label_values.read().expect("metric lock poisoned");
        let b = other.label_values.read().expect("metric lock poisoned");
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|(x, y)| x.labels == y.labels && *x.datum == *y.datum)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} kind={} keys=[{}]",
            self.program,
            self.name,
            self.kind,
            self.keys.join(",")
        )
    }
}

// ─── JSON 표현 ──────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct MetricRepr {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Program")]
    program: String,
    #[serde(rename = "Kind")]
    kind: String,
    #[serde(rename = "Keys")]
    keys: Vec<String>,
    #[serde(rename = "Source", skip_serializing_if = "Option::is_none", default)]
    source: Option<Source>,
    #[serde(rename = "Buckets", skip_serializing_if = "Vec::is_empty", default)]
    bucket_bounds: Vec<f64>,
    #[serde(rename = "LabelValues")]
    label_values: Vec<LabelValueRepr>,
}

#[derive(Serialize, Deserialize)]
struct LabelValueRepr {
    #[serde(rename = "Labels")]
    labels: Vec<String>,
    #[serde(rename = "Value")]
    value: DatumRepr,
}

/// Datum의 JSON 형태. Buckets 변형은 "Buckets" 필드의 존재로 구별됩니다.
/// +∞ 버킷 카운트는 직렬화하지 않으며 `Count - Σ(유한 버킷)`으로 복원합니다.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DatumRepr {
    Buckets {
        #[serde(rename = "Buckets")]
        buckets: Vec<BucketCountRepr>,
        #[serde(rename = "Sum")]
        sum: f64,
        #[serde(rename = "Count")]
        count: u64,
        #[serde(rename = "Time")]
        time: String,
    },
    Scalar {
        #[serde(rename = "Value")]
        value: serde_json::Value,
        #[serde(rename = "Time")]
        time: String,
    },
}

#[derive(Serialize, Deserialize)]
struct BucketCountRepr {
    #[serde(rename = "UpperBound")]
    upper_bound: f64,
    #[serde(rename = "Count")]
    count: u64,
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time<E: serde::de::Error>(s: &str) -> Result<DateTime<Utc>, E> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(E::custom)
}

fn datum_to_repr(value: DatumValue, time: DateTime<Utc>) -> DatumRepr {
    match value {
        DatumValue::Int(v) => DatumRepr::Scalar {
            value: serde_json::Value::from(v),
            time: format_time(time),
        },
        DatumValue::Float(v) => DatumRepr::Scalar {
            value: serde_json::Value::from(v),
            time: format_time(time),
        },
        DatumValue::Text(v) => DatumRepr::Scalar {
            value: serde_json::Value::from(v),
            time: format_time(time),
        },
        DatumValue::Buckets(b) => {
            let buckets = b
                .bounds
                .iter()
                .zip(b.counts.iter())
                .map(|(bound, count)| BucketCountRepr {
                    upper_bound: *bound,
                    count: *count,
                })
                .collect();
            DatumRepr::Buckets {
                buckets,
                sum: b.sum,
                count: b.count,
                time: format_time(time),
            }
        }
    }
}

fn datum_from_repr<E: serde::de::Error>(
    repr: DatumRepr,
    kind: Kind,
) -> Result<(DatumValue, DateTime<Utc>), E> {
    match repr {
        DatumRepr::Scalar { value, time } => {
            let time = parse_time(&time)?;
            let value = match value {
                serde_json::Value::String(s) => DatumValue::Text(s),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        DatumValue::Int(i)
                    } else {
                        DatumValue::Float(n.as_f64().ok_or_else(|| {
                            E::custom("datum value is not representable as f64")
                        })?)
                    }
                }
                other => {
                    return Err(E::custom(format!(
                        "unexpected datum value for kind '{kind}': {other}"
                    )));
                }
            };
            Ok((value, time))
        }
        DatumRepr::Buckets {
            buckets,
            sum,
            count,
            time,
        } => {
            let time = parse_time(&time)?;
            let bounds: Vec<f64> = buckets.iter().map(|b| b.upper_bound).collect();
            let mut counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
            let finite: u64 = counts.iter().sum();
            counts.push(count.saturating_sub(finite)); // +∞ 버킷
            Ok((
                DatumValue::Buckets(Buckets {
                    bounds,
                    counts,
                    sum,
                    count,
                }),
                time,
            ))
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let values = self.label_values.read().expect("metric lock poisoned");
        let repr = MetricRepr {
            name: self.name.clone(),
            program: self.program.clone(),
            kind: self.kind.as_str().to_owned(),
            keys: self.keys.clone(),
            source: self.source.clone(),
            bucket_bounds: self.bucket_bounds.clone(),
            label_values: values
                .iter()
                .map(|lv| {
                    let (value, time) = lv.datum.snapshot();
                    LabelValueRepr {
                        labels: lv.labels.clone(),
                        value: datum_to_repr(value, time),
                    }
                })
                .collect(),
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = MetricRepr::deserialize(deserializer)?;
        let kind = Kind::from_str(&repr.kind).map_err(D::Error::custom)?;

        let mut label_values = Vec::with_capacity(repr.label_values.len());
        for lv in repr.label_values {
            if lv.labels.len() != repr.keys.len() {
                return Err(D::Error::custom(format!(
                    "label value arity {} does not match {} declared keys",
                    lv.labels.len(),
                    repr.keys.len()
                )));
            }
            let (value, time) = datum_from_repr(lv.value, kind)?;
            label_values.push(LabelValue {
                labels: lv.labels,
                datum: Arc::new(Datum::restore(value, time)),
            });
        }

        Ok(Metric {
            name: repr.name,
            program: repr.program,
            kind,
            keys: repr.keys,
            source: repr.source,
            bucket_bounds: repr.bucket_bounds,
            label_values: RwLock::new(label_values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_metric() {
        let m = Metric::new("prog", "test", Kind::Counter, vec![]);
        let d = m.get_datum::<&str>(&[]).unwrap();
        d.inc_by(1, Utc::now()).unwrap();

        let lv = m.find_label_value::<&str>(&[]).expect("labelvalue missing");
        assert_eq!(lv.value(), DatumValue::Int(1));
    }

    #[test]
    fn dimensioned_metric() {
        for keys in [vec!["foo"], vec!["foo", "bar"], vec!["foo", "bar", "quux"]] {
            let labels: Vec<String> = keys.iter().map(|k| format!("v_{k}")).collect();
            let m = Metric::new(
                "prog",
                "test",
                Kind::Counter,
                keys.iter().map(|s| (*s).to_owned()).collect(),
            );
            let d = m.get_datum(&labels).unwrap();
            d.inc_by(1, Utc::now()).unwrap();
            assert_eq!(
                m.find_label_value(&labels).unwrap().value(),
                DatumValue::Int(1)
            );
        }
    }

    #[test]
    fn wrong_label_arity_is_error_not_panic() {
        let m = Metric::new("prog", "test", Kind::Counter, vec!["a".to_owned()]);
        let err = m.get_datum(&["x", "y"]).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::WrongLabelArity {
                expected: 1,
                got: 2
            }
        ));
    }

    #[test]
    fn find_label_value_does_not_create() {
        let m = Metric::new("prog", "foo", Kind::Counter, vec![]);
        assert!(m.find_label_value::<&str>(&[]).is_none());

        m.get_datum::<&str>(&[]).unwrap();
        assert!(m.find_label_value::<&str>(&[]).is_some());

        let m1 = Metric::new("prog", "bar", Kind::Counter, vec!["a".to_owned()]);
        m1.get_datum(&["1"]).unwrap();
        assert!(m1.find_label_value(&["0"]).is_none());
        assert!(m1.find_label_value(&["1"]).is_some());
    }

    #[test]
    fn get_datum_is_idempotent() {
        let m = Metric::new("prog", "test", Kind::Counter, vec!["k".to_owned()]);
        let d1 = m.get_datum(&["a"]).unwrap();
        let d2 = m.get_datum(&["a"]).unwrap();
        assert!(Arc::ptr_eq(&d1, &d2));
        assert_eq!(m.label_value_count(), 1);
    }

    #[test]
    fn emit_label_sets_yields_all_sets() {
        let m = Metric::new(
            "prog",
            "test",
            Kind::Gauge,
            vec!["foo".to_owned(), "bar".to_owned(), "quux".to_owned()],
        );
        let ts = Utc::now();
        for values in [["a", "b", "c"], ["a", "b", "d"]] {
            let d = m.get_datum(&values).unwrap();
            d.set_int(37, ts).unwrap();
        }

        let mut seen = Vec::new();
        m.emit_label_sets(|labels, _snapshot| seen.push(labels));

        assert_eq!(seen.len(), 2);
        for expected in [
            HashMap::from([
                ("foo".to_owned(), "a".to_owned()),
                ("bar".to_owned(), "b".to_owned()),
                ("quux".to_owned(), "c".to_owned()),
            ]),
            HashMap::from([
                ("foo".to_owned(), "a".to_owned()),
                ("bar".to_owned(), "b".to_owned()),
                ("quux".to_owned(), "d".to_owned()),
            ]),
        ] {
            assert!(seen.contains(&expected), "missing label set {expected:?}");
        }
    }

    #[test]
    fn json_round_trip_dimensioned() {
        let m = Metric::new(
            "prog",
            "test",
            Kind::Gauge,
            vec!["foo".to_owned(), "bar".to_owned(), "quux".to_owned()],
        );
        let d = m.get_datum(&["a", "2", "d"]).unwrap();
        d.set_int(1, Utc::now()).unwrap();

        let json = m.to_json().unwrap();
        let restored = Metric::from_json(json.as_bytes()).unwrap();
        assert_eq!(m, restored);
    }

    #[test]
    fn json_round_trip_scalar_counter() {
        let m = Metric::new("prog", "errs", Kind::Counter, vec![]);
        m.get_datum::<&str>(&[])
            .unwrap()
            .inc_by(42, Utc::now())
            .unwrap();

        let json = m.to_json().unwrap();
        let restored = Metric::from_json(json.as_bytes()).unwrap();
        assert_eq!(m, restored);
    }

    #[test]
    fn json_round_trip_text() {
        let m = Metric::new("prog", "build_info", Kind::Text, vec![]);
        m.get_datum::<&str>(&[])
            .unwrap()
            .set_text("v1.2.3", Utc::now())
            .unwrap();

        let restored = Metric::from_json(m.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(m, restored);
    }

    #[test]
    fn json_round_trip_histogram() {
        let m = Metric::new("prog", "latency", Kind::Histogram, vec!["path".to_owned()])
            .with_buckets(vec![0.1, 1.0, 10.0]);
        let d = m.get_datum(&["/api"]).unwrap();
        d.observe(0.05, Utc::now()).unwrap();
        d.observe(5.0, Utc::now()).unwrap();
        d.observe(100.0, Utc::now()).unwrap();

        let restored = Metric::from_json(m.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(m, restored);
    }

    #[test]
    fn json_kind_tag_is_lowercase() {
        let m = Metric::new("prog", "test", Kind::Histogram, vec![]);
        let json = m.to_json().unwrap();
        assert!(json.contains(r#""Kind":"histogram""#));
    }

    #[test]
    fn json_time_is_rfc3339_nanos() {
        let m = Metric::new("prog", "test", Kind::Counter, vec![]);
        m.get_datum::<&str>(&[])
            .unwrap()
            .inc_by(1, Utc::now())
            .unwrap();
        let json = m.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let time = parsed["LabelValues"][0]["Value"]["Time"]
            .as_str()
            .expect("time field missing");
        // 나노초 정밀도: 소수점 이하 9자리
        let frac = time.split('.').nth(1).expect("no fractional seconds");
        assert_eq!(frac.trim_end_matches('Z').len(), 9);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            Kind::Counter,
            Kind::Gauge,
            Kind::Timer,
            Kind::Histogram,
            Kind::Text,
        ] {
            assert_eq!(Kind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn source_survives_round_trip() {
        let m = Metric::new("prog", "test", Kind::Counter, vec![])
            .with_source("rules.mp", 12);
        m.get_datum::<&str>(&[]).unwrap();
        let restored = Metric::from_json(m.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(restored.source.as_ref().unwrap().line, 12);
        assert_eq!(m, restored);
    }
}
