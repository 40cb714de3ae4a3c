//! 로그 스트림 — 소스별 읽기 상태와 워커
//!
//! 스트림 종류는 경로의 형태로 결정됩니다:
//! - `unix:<path>` / `tcp:<addr>` 접두사 -> 소켓 스트림
//! - FIFO 파일 -> 파이프 스트림
//! - 일반 파일 -> 파일 스트림
//!
//! 모든 스트림은 같은 계약을 따릅니다: 워커 태스크가 바이트를 읽어
//! 라인으로 쪼개 테일러의 라인 채널로 보내고, 취소 시 커널에 이미
//! 버퍼된 바이트를 읽고 잔여 라인을 (암묵적 개행으로) 플러시한 뒤
//! 완료로 표시합니다.

mod file;
mod pipe;
mod socket;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logmet_core::metrics::{LABEL_SOURCE, LOG_BYTES_TOTAL, LOG_LINES_TOTAL};
use logmet_core::{FileEvent, LogLine};

use crate::error::TailError;
use crate::waker::Waker;

/// 스트림 워커가 공유하는 실행 문맥
#[derive(Clone)]
pub struct StreamContext {
    /// 라인 출력 채널
    pub lines_tx: mpsc::Sender<LogLine>,
    /// 테일러가 합성 이벤트(Truncate)를 관찰자에게 중계하는 채널
    pub events_tx: Option<mpsc::UnboundedSender<FileEvent>>,
    /// 읽기 준비 신호
    pub waker: Arc<dyn Waker>,
    /// 취소 문맥
    pub cancel: CancellationToken,
    /// 한 번의 읽기에 쓸 버퍼 크기
    pub read_buffer_size: usize,
    /// 신규 파일 유예 기간 (D >= 0)
    pub new_file_grace: Duration,
}

/// 개행 단위 분리 버퍼
///
/// 불변식: `partial`은 절대 `\n`을 포함하지 않습니다.
/// CR-before-LF는 보존됩니다.
pub(crate) struct LineBuffer {
    source: String,
    partial: BytesMut,
}

impl LineBuffer {
    pub(crate) fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            partial: BytesMut::new(),
        }
    }

    /// 새 바이트를 소비하여 완성된 라인들을 `out`에 추가합니다.
    pub(crate) fn consume(&mut self, bytes: &[u8], out: &mut Vec<LogLine>) {
        counter!(LOG_BYTES_TOTAL, LABEL_SOURCE => self.source.clone())
            .increment(bytes.len() as u64);

        let mut data = bytes;
        while let Some(pos) = data.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&data[..pos]);
            self.emit(out);
            data = &data[pos + 1..];
        }
        self.partial.extend_from_slice(data);
    }

    /// 잔여 바이트를 암묵적 개행으로 종료된 라인으로 플러시합니다.
    ///
    /// 잔여가 없으면 아무것도 하지 않습니다.
    pub(crate) fn flush(&mut self, out: &mut Vec<LogLine>) {
        if !self.partial.is_empty() {
            self.emit(out);
        }
    }

    fn emit(&mut self, out: &mut Vec<LogLine>) {
        counter!(LOG_LINES_TOTAL, LABEL_SOURCE => self.source.clone()).increment(1);
        out.push(LogLine::from_bytes(&self.source, &self.partial));
        self.partial.clear();
    }

    /// 잔여 바이트가 있는지 확인합니다.
    pub(crate) fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

/// 실행 중인 스트림의 핸들
///
/// 워커 태스크의 수명과 완료 플래그를 관리합니다.
pub struct StreamHandle {
    source: String,
    complete: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    waker: Arc<dyn Waker>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("source", &self.source)
            .field("complete", &self.complete)
            .field("stop", &self.stop)
            .finish()
    }
}

impl StreamHandle {
    pub(crate) fn new(
        source: String,
        complete: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        waker: Arc<dyn Waker>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            source,
            complete,
            stop,
            waker,
            task: Some(task),
        }
    }

    /// 스트림 소스 이름을 반환합니다.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 스트림이 완료되었는지 확인합니다.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// 스트림에 정지를 요청합니다.
    ///
    /// 파일/소켓 스트림은 남은 바이트를 드레인한 뒤 완료됩니다.
    /// 파이프 스트림에게는 no-op입니다 (쓰기 측 종료 또는 취소로 끝남).
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.waker.wake_all();
    }

    /// 워커 태스크가 끝날 때까지 기다립니다. 중복 호출은 no-op입니다.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// 경로 형태를 보고 알맞은 스트림 워커를 시작합니다.
pub async fn new_stream(pathname: &str, ctx: StreamContext) -> Result<StreamHandle, TailError> {
    if let Some(addr) = pathname.strip_prefix("unix:") {
        return socket::start(socket::SocketAddr::Unix(addr.to_owned()), pathname, ctx).await;
    }
    if let Some(addr) = pathname.strip_prefix("tcp:") {
        return socket::start(socket::SocketAddr::Tcp(addr.to_owned()), pathname, ctx).await;
    }

    let path = Path::new(pathname);
    let meta = tokio::fs::metadata(path).await?;
    if meta.is_dir() {
        return Err(TailError::UnsupportedSource(pathname.to_owned()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if meta.file_type().is_fifo() {
            return pipe::start(path.to_owned(), ctx);
        }
    }

    Ok(file::start(path.to_owned(), ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_splits_at_newlines() {
        let mut buf = LineBuffer::new("src");
        let mut out = Vec::new();
        buf.consume(b"one\ntwo\nthr", &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].line, "one");
        assert_eq!(out[1].line, "two");
        assert!(buf.has_partial());
    }

    #[test]
    fn partial_is_completed_by_later_bytes() {
        let mut buf = LineBuffer::new("src");
        let mut out = Vec::new();
        buf.consume(b"par", &mut out);
        buf.consume(b"tial\n", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, "partial");
        assert!(!buf.has_partial());
    }

    #[test]
    fn empty_line_between_newlines_is_emitted() {
        let mut buf = LineBuffer::new("src");
        let mut out = Vec::new();
        buf.consume(b"a\n\nb\n", &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].line, "");
    }

    #[test]
    fn carriage_return_before_newline_is_preserved() {
        let mut buf = LineBuffer::new("src");
        let mut out = Vec::new();
        buf.consume(b"dos line\r\n", &mut out);
        assert_eq!(out[0].line, "dos line\r");
    }

    #[test]
    fn flush_emits_residual_without_newline() {
        let mut buf = LineBuffer::new("src");
        let mut out = Vec::new();
        buf.consume(b"no newline yet", &mut out);
        assert!(out.is_empty());
        buf.flush(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, "no newline yet");
        // 이중 플러시는 아무것도 내보내지 않음
        buf.flush(&mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn flush_on_empty_buffer_is_noop() {
        let mut buf = LineBuffer::new("src");
        let mut out = Vec::new();
        buf.flush(&mut out);
        assert!(out.is_empty());
    }
}
