//! 파일 스트림 — 오프셋 추적, 로테이션/절단 감지
//!
//! 워커는 웨이크마다 현재 오프셋에서 EOF까지 유한 크기 읽기를
//! 반복합니다. EOF에서 경로를 다시 stat하여:
//! - `(dev, ino)`가 바뀌었으면 로테이션 -- 옛 fd는 이미 EOF까지
//!   소진되었으므로 새 inode를 오프셋 0에서 엽니다.
//! - ENOENT면 남은 바이트가 모두 전달된 상태이므로 잔여 라인을
//!   플러시하고 완료합니다.
//!
//! 절단은 열린 fd의 fstat 크기가 오프셋보다 작아졌을 때 감지하며,
//! 잔여 라인을 플러시하고 오프셋을 0으로 되돌린 뒤 Truncate 이벤트를
//! 합성합니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use logmet_core::FileEvent;
use logmet_core::metrics::{LABEL_SOURCE, LOG_ROTATIONS_TOTAL, LOG_TRUNCATIONS_TOTAL};

use super::{LineBuffer, StreamContext, StreamHandle};

/// 파일 스트림 워커를 시작합니다.
pub(crate) fn start(path: PathBuf, ctx: StreamContext) -> StreamHandle {
    let source = path.display().to_string();
    let complete = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));
    let waker = Arc::clone(&ctx.waker);

    let worker = FileWorker {
        buffer: LineBuffer::new(&source),
        source: source.clone(),
        path,
        ctx,
        complete: Arc::clone(&complete),
        stop: Arc::clone(&stop),
        file: None,
        identity: None,
        offset: 0,
    };
    let task = tokio::spawn(worker.run());

    StreamHandle::new(source, complete, stop, waker, task)
}

/// pump 한 사이클의 결과
enum PumpState {
    /// EOF에 도달, 다음 웨이크 대기
    Idle,
    /// 파일이 사라졌거나 출력 채널이 닫힘 -- 스트림 종료
    Gone,
}

struct FileWorker {
    path: PathBuf,
    source: String,
    ctx: StreamContext,
    complete: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    file: Option<tokio::fs::File>,
    /// 마지막으로 연 파일의 (device, inode)
    identity: Option<(u64, u64)>,
    offset: u64,
    buffer: LineBuffer,
}

impl FileWorker {
    async fn run(mut self) {
        // 신규 파일 유예: D > 0이면 첫 읽기 전에 대기
        if !self.ctx.new_file_grace.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.ctx.new_file_grace) => {}
                _ = self.ctx.cancel.cancelled() => {}
            }
        }

        loop {
            if matches!(self.pump().await, PumpState::Gone) {
                break;
            }
            if self.stop.load(Ordering::Acquire) || self.ctx.cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = self.ctx.waker.woken() => {}
                _ = self.ctx.cancel.cancelled() => {
                    // 커널에 이미 도착한 바이트를 드레인
                    let _ = self.pump().await;
                    break;
                }
            }
        }

        // 잔여 라인을 암묵적 개행으로 플러시
        let mut out = Vec::new();
        self.buffer.flush(&mut out);
        for line in out {
            let _ = self.ctx.lines_tx.send(line).await;
        }
        self.complete.store(true, Ordering::Release);
        debug!(source = %self.source, "file stream complete");
    }

    /// 현재 오프셋에서 EOF까지 읽고 라인을 전달합니다.
    async fn pump(&mut self) -> PumpState {
        let mut out = Vec::new();
        loop {
            if self.file.is_none() && !self.open().await {
                return self.deliver_then(&mut out, PumpState::Gone).await;
            }
            let Some(file) = self.file.as_mut() else {
                // 일시적 열기 실패 -- 다음 웨이크에서 재시도
                return self.deliver_then(&mut out, PumpState::Idle).await;
            };

            // 절단 확인은 열린 fd 기준 (로테이션과 혼동하지 않도록)
            if let Ok(meta) = file.metadata().await
                && meta.len() < self.offset
            {
                self.handle_truncate(&mut out).await;
                continue;
            }
            let file = self.file.as_mut().expect("file just checked");

            let mut buf = vec![0u8; self.ctx.read_buffer_size];
            match file.read(&mut buf).await {
                Ok(0) => {
                    match self.check_rotation().await {
                        RotationState::Rotated => continue,
                        RotationState::Deleted => {
                            return self.deliver_then(&mut out, PumpState::Gone).await;
                        }
                        RotationState::None => {
                            return self.deliver_then(&mut out, PumpState::Idle).await;
                        }
                    }
                }
                Ok(n) => {
                    self.offset += n as u64;
                    self.buffer.consume(&buf[..n], &mut out);
                    if !self.deliver(&mut out).await {
                        return PumpState::Gone;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // 일시적 I/O -- 로그 없이 다음 웨이크에서 재시도
                    let _ = e;
                    return self.deliver_then(&mut out, PumpState::Idle).await;
                }
            }
        }
    }

    /// 파일을 엽니다. ENOENT면 false (스트림 종료)를 반환합니다.
    async fn open(&mut self) -> bool {
        match tokio::fs::File::open(&self.path).await {
            Ok(file) => {
                if let Ok(meta) = file.metadata().await {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::MetadataExt;
                        self.identity = Some((meta.dev(), meta.ino()));
                    }
                }
                self.offset = 0;
                self.file = Some(file);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                debug!(source = %self.source, error = %e, "transient open failure");
                self.file = None;
                true
            }
        }
    }

    /// EOF에서 경로를 stat하여 로테이션/삭제를 판정합니다.
    async fn check_rotation(&mut self) -> RotationState {
        // 정지 요청 중에는 새 inode를 따라가지 않음 (옛 fd 드레인만)
        if self.stop.load(Ordering::Acquire) {
            return RotationState::None;
        }
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::MetadataExt;
                    let id = (meta.dev(), meta.ino());
                    if self.identity.is_some() && self.identity != Some(id) {
                        info!(source = %self.source, "log rotation detected");
                        counter!(LOG_ROTATIONS_TOTAL, LABEL_SOURCE => self.source.clone())
                            .increment(1);
                        self.file = None; // 다음 pump 루프에서 새 inode를 오프셋 0으로 엶
                        return RotationState::Rotated;
                    }
                }
                RotationState::None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RotationState::Deleted,
            Err(_) => RotationState::None,
        }
    }

    /// 절단 처리: 잔여 플러시, 오프셋 0으로 복귀, Truncate 합성.
    async fn handle_truncate(&mut self, out: &mut Vec<logmet_core::LogLine>) {
        warn!(source = %self.source, offset = self.offset, "file truncated, resetting offset");
        counter!(LOG_TRUNCATIONS_TOTAL, LABEL_SOURCE => self.source.clone()).increment(1);

        self.buffer.flush(out);
        if let Some(file) = self.file.as_mut() {
            let _ = file.seek(std::io::SeekFrom::Start(0)).await;
        }
        self.offset = 0;

        if let Some(events_tx) = &self.ctx.events_tx {
            let _ = events_tx.send(FileEvent::Truncate(self.path.clone()));
        }
    }

    /// 모인 라인을 채널로 전달합니다. 채널이 닫혔으면 false.
    async fn deliver(&mut self, out: &mut Vec<logmet_core::LogLine>) -> bool {
        for line in out.drain(..) {
            if self.ctx.lines_tx.send(line).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn deliver_then(
        &mut self,
        out: &mut Vec<logmet_core::LogLine>,
        state: PumpState,
    ) -> PumpState {
        if !self.deliver(out).await {
            return PumpState::Gone;
        }
        state
    }
}

enum RotationState {
    None,
    Rotated,
    Deleted,
}
