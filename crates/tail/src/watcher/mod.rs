//! 와처 — 디렉토리 트리의 파일 이벤트 소스
//!
//! 두 백엔드를 생성 시점에 선택합니다:
//! - 네이티브: OS 파일 변경 통지 (notify 크레이트)
//! - 폴링: 주기적 stat 비교
//!
//! 네이티브 백엔드 생성이 실패하면(fd 한도 초과 등) 에러 없이 폴링으로
//! 폴백하고 `watcher_fallback_total`을 증가시킵니다. 폴백은 생성 시점의
//! 결정이며 이벤트별 런타임 디스패치가 아닙니다.
//!
//! 와처 내부 에러는 `log_watcher_errors_total`로 집계되고 로깅될 뿐
//! 와처를 종료시키지 않습니다.

mod native;
mod poll;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::warn;

use logmet_core::FileEvent;
use logmet_core::metrics::{
    LABEL_PATH, LOG_WATCHER_ERRORS_TOTAL, LOG_WATCHER_EVENT_COUNT, WATCHER_FALLBACK_TOTAL,
};

use crate::error::TailError;

/// 백엔드가 이벤트를 내보내는 싱크
///
/// 모든 이벤트는 여기서 `log_watcher_event_count{path}`로 집계됩니다.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<FileEvent>,
}

impl EventSink {
    fn new(tx: mpsc::UnboundedSender<FileEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn send(&self, event: FileEvent) {
        counter!(
            LOG_WATCHER_EVENT_COUNT,
            LABEL_PATH => event.pathname().display().to_string()
        )
        .increment(1);
        let _ = self.tx.send(event);
    }

    pub(crate) fn error(&self, err: impl fmt::Display) {
        counter!(LOG_WATCHER_ERRORS_TOTAL).increment(1);
        warn!(error = %err, "watcher backend error");
    }
}

enum Backend {
    Native(native::NativeWatcher),
    Poll(poll::PollWatcher),
}

/// 파일 시스템 와처
///
/// # 사용 예시
/// ```ignore
/// let mut watcher = LogWatcher::new(Duration::from_millis(250), true)?;
/// let mut events = watcher.take_events().unwrap();
/// watcher.observe(Path::new("/var/log"))?;
/// while let Some(event) = events.recv().await { ... }
/// ```
pub struct LogWatcher {
    backend: Backend,
    events_rx: Option<mpsc::UnboundedReceiver<FileEvent>>,
}

impl LogWatcher {
    /// 와처를 생성합니다.
    ///
    /// `enable_native`가 true면 네이티브 백엔드를 먼저 시도하고,
    /// 실패 시 폴링으로 폴백합니다. false면 곧바로 폴링을 사용합니다.
    pub fn new(poll_interval: Duration, enable_native: bool) -> Result<Self, TailError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        let backend = if enable_native {
            match native::NativeWatcher::new(sink.clone()) {
                Ok(w) => Backend::Native(w),
                Err(e) => {
                    counter!(WATCHER_FALLBACK_TOTAL).increment(1);
                    warn!(error = %e, "native watcher unavailable, falling back to polling");
                    Backend::Poll(poll::PollWatcher::new(poll_interval, sink))
                }
            }
        } else {
            Backend::Poll(poll::PollWatcher::new(poll_interval, sink))
        };

        Ok(Self {
            backend,
            events_rx: Some(rx),
        })
    }

    /// 이벤트 수신 채널을 가져갑니다. 한 번만 가능합니다.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<FileEvent>> {
        self.events_rx.take()
    }

    /// 경로 관찰을 등록합니다.
    ///
    /// 존재하지 않는 경로는 에러입니다 (설정 에러로 표면화).
    /// 권한 거부는 한 번 로깅하고 성공으로 처리합니다 -- 이후 chmod로
    /// 읽을 수 있게 되면 재스캔이 다시 시도합니다.
    pub fn observe(&self, path: &Path) -> Result<(), TailError> {
        match std::fs::metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                warn!(path = %path.display(), "permission denied observing path, will retry on rescan");
                return Ok(());
            }
            Err(e) => return Err(TailError::Io(e)),
        }

        match &self.backend {
            Backend::Native(w) => w.observe(path),
            Backend::Poll(w) => w.observe(path),
        }
    }

    /// 폴링 백엔드를 사용 중인지 반환합니다.
    pub fn is_polling(&self) -> bool {
        matches!(self.backend, Backend::Poll(_))
    }

    /// 와처를 종료합니다. 이후 이벤트는 전달되지 않습니다.
    pub fn close(&self) {
        match &self.backend {
            Backend::Native(w) => w.close(),
            Backend::Poll(w) => w.close(),
        }
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
