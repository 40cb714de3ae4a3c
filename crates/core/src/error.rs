//! 에러 타입 — 도메인별 에러 정의
//!
//! 각 크레이트(metrics, vm, tail)는 자체 도메인 에러를 정의하고,
//! [`LogmetError`]로 변환하여 상위 레이어에 전파합니다.
//! 코어는 절대 `exit`를 호출하지 않습니다. 생성자에서 에러를 반환하거나,
//! 카운터를 증가시키거나, 취소 시 정리 후 종료하는 것이 전부입니다.

/// logmet 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogmetError {
    /// 설정 관련 에러 (잘못된 glob, 읽을 수 없는 디렉토리 등)
    #[error("config error: {0}")]
    Config(String),

    /// 메트릭 저장소 에러
    #[error("metrics error: {0}")]
    Metrics(String),

    /// VM 실행 에러
    #[error("vm error: {0}")]
    Vm(String),

    /// 테일러/스트림 에러
    #[error("tail error: {0}")]
    Tail(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
