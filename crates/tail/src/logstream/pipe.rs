//! 파이프 스트림 — named pipe (FIFO) 읽기
//!
//! FIFO는 `O_RDONLY | O_NONBLOCK`으로 열어 쓰기 측이 없어도 열기가
//! 블록되지 않게 합니다. 데이터를 읽은 적이 있는 상태에서 0바이트
//! 읽기가 나오면 쓰기 측이 닫힌 것이므로 완료합니다. 아직 아무것도
//! 읽지 못한 0바이트 읽기는 "쓰기 측이 아직 없음"이므로 다음 웨이크를
//! 기다립니다.
//!
//! `stop()`은 no-op입니다 -- 파이프는 쓰기 측 종료 또는 취소로
//! 스스로 끝납니다.

use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{LineBuffer, StreamContext, StreamHandle};
use crate::error::TailError;

/// 파이프 스트림 워커를 시작합니다.
pub(crate) fn start(path: PathBuf, ctx: StreamContext) -> Result<StreamHandle, TailError> {
    let source = path.display().to_string();

    let std_file = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&path)?;
    let file = tokio::fs::File::from_std(std_file);

    let complete = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));
    let waker = Arc::clone(&ctx.waker);

    let worker = PipeWorker {
        buffer: LineBuffer::new(&source),
        source: source.clone(),
        ctx,
        complete: Arc::clone(&complete),
        file,
        total_read: 0,
    };
    let task = tokio::spawn(worker.run());

    Ok(StreamHandle::new(source, complete, stop, waker, task))
}

struct PipeWorker {
    source: String,
    ctx: StreamContext,
    complete: Arc<AtomicBool>,
    file: tokio::fs::File,
    buffer: LineBuffer,
    /// 지금까지 읽은 총 바이트. EOF 판정(쓰기 측 닫힘)에 사용.
    total_read: u64,
}

impl PipeWorker {
    async fn run(mut self) {
        let mut out = Vec::new();
        let mut buf = vec![0u8; self.ctx.read_buffer_size];

        'outer: loop {
            match self.file.read(&mut buf).await {
                Ok(0) => {
                    if self.total_read > 0 {
                        // 쓰기 측이 닫힘
                        break;
                    }
                    // 아직 쓰기 측이 연 적 없음 -- 웨이크 대기
                    if !self.wait(&mut out, &mut buf).await {
                        break 'outer;
                    }
                }
                Ok(n) => {
                    self.total_read += n as u64;
                    self.buffer.consume(&buf[..n], &mut out);
                    if !self.deliver(&mut out).await {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if !self.wait(&mut out, &mut buf).await {
                        break 'outer;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(source = %self.source, error = %e, "pipe read error, waiting");
                    if !self.wait(&mut out, &mut buf).await {
                        break 'outer;
                    }
                }
            }
        }

        self.buffer.flush(&mut out);
        let _ = self.deliver(&mut out).await;
        self.complete.store(true, Ordering::Release);
        debug!(source = %self.source, "pipe stream complete");
    }

    /// 웨이크 또는 취소를 기다립니다. 취소면 버퍼된 바이트를 드레인하고
    /// false를 반환합니다.
    async fn wait(&mut self, out: &mut Vec<logmet_core::LogLine>, buf: &mut [u8]) -> bool {
        tokio::select! {
            _ = self.ctx.waker.woken() => true,
            _ = self.ctx.cancel.cancelled() => {
                self.drain(out, buf).await;
                false
            }
        }
    }

    /// 취소 시점에 커널에 이미 도착한 바이트를 모두 읽습니다.
    async fn drain(&mut self, out: &mut Vec<logmet_core::LogLine>, buf: &mut [u8]) {
        loop {
            match self.file.read(buf).await {
                Ok(0) => break,
                Ok(n) => {
                    self.total_read += n as u64;
                    self.buffer.consume(&buf[..n], out);
                }
                Err(_) => break,
            }
        }
    }

    async fn deliver(&mut self, out: &mut Vec<logmet_core::LogLine>) -> bool {
        for line in out.drain(..) {
            if self.ctx.lines_tx.send(line).await.is_err() {
                return false;
            }
        }
        true
    }
}
