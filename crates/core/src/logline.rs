//! 라인 레코드 — 스트림과 VM 사이를 오가는 기본 단위
//!
//! 각 로그 스트림은 개행으로 끝나는 레코드를 [`LogLine`]으로 변환하여
//! 테일러의 라인 채널로 전송합니다. 텍스트는 UTF-8 lossy 변환되며,
//! 끝의 `\n`은 제거되지만 그 앞의 `\r`은 보존됩니다.

use std::fmt;

use chrono::{DateTime, Utc};

/// 하나의 로그 라인
///
/// 단일 스트림 안에서 라인 순서는 파일/도착 순서 그대로 유지됩니다.
/// 스트림 간 순서는 보장하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// 수신 시각
    pub received: DateTime<Utc>,
    /// 소스 이름 (파일 경로, 파이프 경로, 소켓 주소 등)
    pub filename: String,
    /// 개행을 제외한 라인 텍스트. 빈 라인이면 빈 문자열입니다.
    pub line: String,
}

impl LogLine {
    /// 현재 시각으로 새 라인 레코드를 생성합니다.
    pub fn new(filename: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            received: Utc::now(),
            filename: filename.into(),
            line: line.into(),
        }
    }

    /// 개행 전의 원시 바이트에서 라인 레코드를 생성합니다.
    ///
    /// 유효하지 않은 UTF-8 시퀀스는 U+FFFD로 대체됩니다.
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(filename, String::from_utf8_lossy(bytes).into_owned())
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.filename, self.line)
    }
}
