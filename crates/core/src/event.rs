//! 파일 이벤트 — 와처와 테일러 사이의 통신 단위
//!
//! 와처 백엔드는 OS 통지 또는 폴링 결과를 [`FileEvent`]로 정규화하여
//! 테일러 슈퍼바이저에 전달합니다. `Truncate`는 와처가 아니라 테일러가
//! stat 결과(크기 < 오프셋)로부터 합성하는 이벤트입니다.

use std::fmt;
use std::path::{Path, PathBuf};

/// 감시 경로에서 발생한 파일 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileEvent {
    /// 경로가 새로 생성됨
    Create(PathBuf),
    /// 경로의 내용 또는 메타데이터가 변경됨 (chmod 포함)
    Update(PathBuf),
    /// 경로가 삭제됨
    Delete(PathBuf),
    /// 파일 크기가 현재 읽기 오프셋보다 작아짐 (테일러 합성)
    Truncate(PathBuf),
}

impl FileEvent {
    /// 이벤트가 가리키는 경로를 반환합니다.
    pub fn pathname(&self) -> &Path {
        match self {
            Self::Create(p) | Self::Update(p) | Self::Delete(p) | Self::Truncate(p) => p,
        }
    }

    /// 이벤트 종류의 이름을 반환합니다 (로깅 및 카운터 레이블용).
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Truncate(_) => "truncate",
        }
    }
}

impl fmt::Display for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op_name(), self.pathname().display())
    }
}
