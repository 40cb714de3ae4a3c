//! 프로세서 인터페이스 — 외부 협력자와의 경계
//!
//! 코어는 두 가지 형태에만 의존합니다:
//! [`LineProcessor`]는 라인 레코드를 소비하고,
//! [`FileEventProcessor`]는 파일 이벤트를 소비합니다.
//! CLI, HTTP 익스포터 같은 외부 협력자는 이 trait을 구현하여
//! 테일러와 와처에 연결됩니다.

use std::future::Future;
use std::pin::Pin;

use crate::event::FileEvent;
use crate::logline::LogLine;

/// dyn-compatible Future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 라인 레코드 소비자
///
/// 테일러의 디스패치 태스크가 라인을 읽은 순서대로 호출합니다.
/// 단일 소스의 라인은 호출 순서가 보존됩니다.
///
/// # 구현 예시
/// ```ignore
/// struct CountingProcessor(AtomicU64);
///
/// impl LineProcessor for CountingProcessor {
///     fn process_line(&self, _line: LogLine) -> BoxFuture<'_, ()> {
///         Box::pin(async move {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         })
///     }
/// }
/// ```
pub trait LineProcessor: Send + Sync {
    /// 라인 하나를 처리합니다.
    fn process_line(&self, line: LogLine) -> BoxFuture<'_, ()>;
}

/// 파일 이벤트 소비자
///
/// 와처 이벤트를 구독하는 외부 협력자가 구현합니다.
/// 이벤트 처리 중 블로킹하면 와처 이벤트 전달이 지연되므로
/// 무거운 작업은 내부에서 태스크로 분리해야 합니다.
pub trait FileEventProcessor: Send + Sync {
    /// 파일 이벤트 하나를 처리합니다.
    fn process_file_event(&self, event: &FileEvent);
}
