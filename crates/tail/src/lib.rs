#![doc = include_str!("../README.md")]

pub mod error;
pub mod logstream;
pub mod tailer;
pub mod waker;
pub mod watcher;

// --- 주요 타입 re-export ---

pub use error::TailError;
pub use logstream::{StreamContext, StreamHandle, new_stream};
pub use tailer::{Tailer, TailerBuilder, TailerConfig};
pub use waker::{TestWaker, TimerWaker, Waker};
pub use watcher::LogWatcher;
