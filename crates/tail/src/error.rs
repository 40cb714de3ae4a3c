//! 테일링 도메인 에러 타입

use logmet_core::LogmetError;

/// 테일러/스트림/와처 에러
///
/// 설정 에러(잘못된 glob, 존재하지 않는 관찰 대상)는 생성자에서
/// 반환됩니다. 일시적 I/O는 에러로 표면화하지 않고 다음 웨이크에서
/// 재시도합니다.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// 잘못된 glob 패턴
    #[error("bad glob pattern '{pattern}': {reason}")]
    Pattern {
        /// 문제가 된 패턴
        pattern: String,
        /// 실패 사유
        reason: String,
    },

    /// 와처 백엔드 에러
    #[error("watcher error: {0}")]
    Watcher(String),

    /// 지원하지 않는 소스 유형 (디렉토리 등)
    #[error("unsupported source type for '{0}'")]
    UnsupportedSource(String),

    /// 소켓 주소 파싱 실패
    #[error("bad socket address '{0}'")]
    BadAddress(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 설정 값 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TailError> for LogmetError {
    fn from(err: TailError) -> Self {
        match err {
            TailError::Io(io) => LogmetError::Io(io),
            other => LogmetError::Tail(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_error_display() {
        let err = TailError::Pattern {
            pattern: "[[".to_owned(),
            reason: "unclosed character class".to_owned(),
        };
        assert!(err.to_string().contains("[["));
    }

    #[test]
    fn io_error_converts_to_top_level_io() {
        let err = TailError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let top: LogmetError = err.into();
        assert!(matches!(top, LogmetError::Io(_)));
    }
}
