#![doc = include_str!("../README.md")]

pub mod datum;
pub mod error;
pub mod metric;
pub mod store;

// --- 주요 타입 re-export ---

pub use datum::{Buckets, Datum, DatumValue};
pub use error::MetricsError;
pub use metric::{Kind, LabelValue, Metric, Source};
pub use store::MetricStore;
