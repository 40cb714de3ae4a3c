//! Waker — 준비 신호의 추상화
//!
//! 스트림 워커는 읽을 것이 없을 때 웨이커를 기다립니다.
//! 프로덕션 구현([`TimerWaker`])은 주기 타이머와 와처 이벤트마다
//! 발화하고, 테스트 구현([`TestWaker`])은 `wake_all()` 호출 시에만
//! 발화하여 실제 시간 경과 없이 단계별 테스트를 가능하게 합니다.
//!
//! 구독은 `woken()` 호출 시점에 등록되므로, 등록과 await 사이에
//! 발생한 웨이크는 유실되지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use logmet_core::BoxFuture;

/// 준비 신호 소스
pub trait Waker: Send + Sync {
    /// 다음 웨이크 신호를 기다리는 Future를 반환합니다.
    ///
    /// 반환 시점에 구독이 등록됩니다.
    fn woken(&self) -> BoxFuture<'static, ()>;

    /// 현재 구독자 전원을 깨웁니다.
    fn wake_all(&self);
}

/// 주기 타이머 + 수동 웨이크 프로덕션 웨이커
///
/// 테일러는 와처의 Update 이벤트마다 `wake_all()`을 호출하여
/// 타이머 주기를 기다리지 않고 읽기를 트리거합니다.
pub struct TimerWaker {
    tx: broadcast::Sender<()>,
}

impl TimerWaker {
    /// 주기적으로 발화하는 웨이커를 생성합니다.
    ///
    /// 배경 타이머 태스크는 `cancel` 취소 시 종료됩니다.
    pub fn new(interval: Duration, cancel: CancellationToken) -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        let waker = Arc::new(Self { tx });

        let tick_tx = waker.tx.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        // 구독자가 없으면 send가 실패하지만 문제없음
                        let _ = tick_tx.send(());
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });

        waker
    }
}

impl Waker for TimerWaker {
    fn woken(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            // Lagged/Closed도 웨이크로 취급 -- 호출자가 상태를 재확인함
            let _ = rx.recv().await;
        })
    }

    fn wake_all(&self) {
        let _ = self.tx.send(());
    }
}

/// 수동 웨이커 -- `wake_all()` 호출 시에만 발화합니다.
pub struct TestWaker {
    tx: broadcast::Sender<()>,
}

impl TestWaker {
    /// 새 테스트 웨이커를 생성합니다.
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Self { tx })
    }
}

impl Waker for TestWaker {
    fn woken(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            let _ = rx.recv().await;
        })
    }

    fn wake_all(&self) {
        let _ = self.tx.send(());
    }
}
