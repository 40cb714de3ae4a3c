//! MetricStore — 프로세스 전역 메트릭 레지스트리
//!
//! `(program, name)` 키로 메트릭을 등록하고 조회합니다.
//! 익스포터는 동시에 읽고, 프로그램 로더는 배타적으로 삽입합니다.
//! 저장소 전체는 프로세스 내 유일한 공유 가변 상태이며,
//! Datum 갱신은 각 Datum의 동기화로 직렬화됩니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::MetricsError;
use crate::metric::{Kind, Metric};

/// 프로세스 전역 메트릭 저장소
#[derive(Debug, Default)]
pub struct MetricStore {
    inner: RwLock<HashMap<(String, String), Arc<Metric>>>,
}

impl MetricStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 메트릭을 생성하거나, 같은 형태의 기존 메트릭을 반환합니다.
    ///
    /// 같은 `(program, name)`으로 종류나 키가 다른 메트릭이 이미
    /// 있으면 [`MetricsError::Redefinition`]을 반환합니다.
    pub fn new_metric(
        &self,
        program: &str,
        name: &str,
        kind: Kind,
        keys: &[&str],
    ) -> Result<Arc<Metric>, MetricsError> {
        let key = (program.to_owned(), name.to_owned());

        {
            let metrics = self.inner.read().expect("store lock poisoned");
            if let Some(existing) = metrics.get(&key) {
                return Self::check_shape(existing, kind, keys).map(|_| Arc::clone(existing));
            }
        }

        let mut metrics = self.inner.write().expect("store lock poisoned");
        if let Some(existing) = metrics.get(&key) {
            return Self::check_shape(existing, kind, keys).map(|_| Arc::clone(existing));
        }
        let metric = Arc::new(Metric::new(
            program,
            name,
            kind,
            keys.iter().map(|k| (*k).to_owned()).collect(),
        ));
        metrics.insert(key, Arc::clone(&metric));
        tracing::debug!(program, name, kind = %kind, "registered metric");
        Ok(metric)
    }

    fn check_shape(existing: &Metric, kind: Kind, keys: &[&str]) -> Result<(), MetricsError> {
        let same_keys = existing.keys.len() == keys.len()
            && existing.keys.iter().zip(keys.iter()).all(|(a, b)| a == b);
        if existing.kind == kind && same_keys {
            Ok(())
        } else {
            Err(MetricsError::Redefinition {
                program: existing.program.clone(),
                name: existing.name.clone(),
            })
        }
    }

    /// 이미 구성된 메트릭을 등록합니다 (역직렬화된 메트릭 등).
    ///
    /// 같은 키의 기존 항목은 교체됩니다.
    pub fn add(&self, metric: Metric) -> Arc<Metric> {
        let key = (metric.program.clone(), metric.name.clone());
        let metric = Arc::new(metric);
        self.inner
            .write()
            .expect("store lock poisoned")
            .insert(key, Arc::clone(&metric));
        metric
    }

    /// `(program, name)`으로 메트릭을 찾습니다.
    pub fn find(&self, program: &str, name: &str) -> Option<Arc<Metric>> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .get(&(program.to_owned(), name.to_owned()))
            .map(Arc::clone)
    }

    /// 등록된 메트릭 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").len()
    }

    /// 저장소가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("store lock poisoned").is_empty()
    }

    /// 모든 메트릭을 `(program, name)` 순으로 정렬하여 반환합니다.
    pub fn metrics(&self) -> Vec<Arc<Metric>> {
        let metrics = self.inner.read().expect("store lock poisoned");
        let mut out: Vec<Arc<Metric>> = metrics.values().map(Arc::clone).collect();
        out.sort_by(|a, b| {
            (a.program.as_str(), a.name.as_str()).cmp(&(b.program.as_str(), b.name.as_str()))
        });
        out
    }

    /// 저장소 전체를 JSON 배열로 직렬화합니다.
    pub fn to_json(&self) -> Result<String, MetricsError> {
        let metrics = self.metrics();
        let refs: Vec<&Metric> = metrics.iter().map(Arc::as_ref).collect();
        Ok(serde_json::to_string(&refs)?)
    }
}
