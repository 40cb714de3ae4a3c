//! VM 값 — 스택 셀의 타입
//!
//! 스택 셀은 스칼라(Int/Float/Str/Bool)와 메트릭 계열 핸들
//! (Metric/Datum)을 담습니다. 핸들은 장수명 공유 참조이며
//! 라인 사이에도 저장소에 남지만, 스택 자체는 라인마다 비워집니다.

use std::fmt;
use std::sync::Arc;

use logmet_metrics::{Datum, Metric};

/// 스택 셀 값
#[derive(Debug, Clone)]
pub enum Value {
    /// 정수
    Int(i64),
    /// 부동소수점
    Float(f64),
    /// 문자열
    Str(String),
    /// 매치 결과 등 불리언
    Bool(bool),
    /// 메트릭 핸들 (`mload`가 푸시)
    Metric(Arc<Metric>),
    /// Datum 핸들 (`dload`가 푸시)
    Datum(Arc<Datum>),
}

impl Value {
    /// 타입 이름을 반환합니다 (에러 메시지용).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bool(_) => "bool",
            Self::Metric(_) => "metric",
            Self::Datum(_) => "datum",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Metric(m) => write!(f, "<metric {}/{}>", m.program, m.name),
            Self::Datum(_) => write!(f, "<datum>"),
        }
    }
}
