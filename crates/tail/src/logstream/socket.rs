//! 소켓 스트림 — Unix/TCP 리스너와 연결별 읽기
//!
//! 리스너 태스크가 연결을 수락하고, 수락된 연결마다 자체 태스크가
//! 라인을 읽습니다. 연결 종료는 해당 연결 인스턴스의 완료이고,
//! 리스너 핸들은 취소(또는 stop) 후 모든 연결이 드레인되면 완료로
//! 표시됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinSet;
use tracing::debug;

use super::{LineBuffer, StreamContext, StreamHandle};
use crate::error::TailError;

/// 소켓 주소 형태
pub(crate) enum SocketAddr {
    /// `unix:<path>`
    Unix(String),
    /// `tcp:<host:port>`
    Tcp(String),
}

/// 소켓 리스너 워커를 시작합니다.
pub(crate) async fn start(
    addr: SocketAddr,
    source: &str,
    ctx: StreamContext,
) -> Result<StreamHandle, TailError> {
    let complete = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));
    let waker = Arc::clone(&ctx.waker);
    let source = source.to_owned();

    let task = match addr {
        SocketAddr::Unix(path) => {
            let listener = UnixListener::bind(&path)
                .map_err(|e| TailError::BadAddress(format!("unix:{path}: {e}")))?;
            let worker = ListenerWorker {
                source: source.clone(),
                ctx,
                complete: Arc::clone(&complete),
                stop: Arc::clone(&stop),
            };
            tokio::spawn(worker.run_unix(listener))
        }
        SocketAddr::Tcp(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| TailError::BadAddress(format!("tcp:{addr}: {e}")))?;
            let worker = ListenerWorker {
                source: source.clone(),
                ctx,
                complete: Arc::clone(&complete),
                stop: Arc::clone(&stop),
            };
            tokio::spawn(worker.run_tcp(listener))
        }
    };

    Ok(StreamHandle::new(source, complete, stop, waker, task))
}

struct ListenerWorker {
    source: String,
    ctx: StreamContext,
    complete: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl ListenerWorker {
    async fn run_unix(self, listener: UnixListener) {
        let mut conns = JoinSet::new();
        loop {
            tokio::select! {
                res = listener.accept() => match res {
                    Ok((stream, _)) => {
                        debug!(source = %self.source, "accepted unix connection");
                        conns.spawn(handle_conn(stream, self.source.clone(), self.ctx.clone()));
                    }
                    Err(e) => debug!(source = %self.source, error = %e, "accept error"),
                },
                _ = self.ctx.cancel.cancelled() => break,
                _ = self.ctx.waker.woken() => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                }
            }
        }
        self.finish(conns).await;
    }

    async fn run_tcp(self, listener: TcpListener) {
        let mut conns = JoinSet::new();
        loop {
            tokio::select! {
                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        debug!(source = %self.source, peer = %peer, "accepted tcp connection");
                        conns.spawn(handle_conn(stream, self.source.clone(), self.ctx.clone()));
                    }
                    Err(e) => debug!(source = %self.source, error = %e, "accept error"),
                },
                _ = self.ctx.cancel.cancelled() => break,
                _ = self.ctx.waker.woken() => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                }
            }
        }
        self.finish(conns).await;
    }

    /// 수락 루프 종료 후 열린 연결이 모두 드레인될 때까지 기다립니다.
    async fn finish(self, mut conns: JoinSet<()>) {
        while conns.join_next().await.is_some() {}
        self.complete.store(true, Ordering::Release);
        debug!(source = %self.source, "socket stream complete");
    }
}

/// 연결 하나를 읽습니다. 연결 종료 시 잔여 라인을 플러시합니다.
async fn handle_conn<R>(mut stream: R, source: String, ctx: StreamContext)
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut buffer = LineBuffer::new(&source);
    let mut out = Vec::new();
    let mut buf = vec![0u8; ctx.read_buffer_size];

    loop {
        tokio::select! {
            res = stream.read(&mut buf) => match res {
                Ok(0) => break, // 연결 종료 -- 이 인스턴스 완료
                Ok(n) => {
                    buffer.consume(&buf[..n], &mut out);
                    for line in out.drain(..) {
                        if ctx.lines_tx.send(line).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(source = %source, error = %e, "connection read error");
                    break;
                }
            },
            _ = ctx.cancel.cancelled() => break,
        }
    }

    buffer.flush(&mut out);
    for line in out {
        let _ = ctx.lines_tx.send(line).await;
    }
}
