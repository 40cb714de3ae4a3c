//! 네이티브 와처 백엔드 — OS 파일 변경 통지
//!
//! notify 크레이트의 권장 백엔드(리눅스 inotify)를 사용합니다.
//! 이벤트 매핑: Create -> Create, Modify(내용/메타데이터, chmod 포함)
//! -> Update, Remove -> Delete. 이름 변경은 From 경로의 Delete와
//! To 경로의 Create로 정규화합니다. 그 외(Access 등)는 무시합니다.

use std::path::Path;
use std::sync::Mutex;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

use logmet_core::FileEvent;

use super::EventSink;
use crate::error::TailError;

pub(crate) struct NativeWatcher {
    // notify의 watch()는 &mut를 요구함
    inner: Mutex<Option<RecommendedWatcher>>,
}

fn dispatch(sink: &EventSink, event: notify::Event) {
    match event.kind {
        EventKind::Create(_) => {
            for path in event.paths {
                sink.send(FileEvent::Create(path));
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                sink.send(FileEvent::Delete(path));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in event.paths {
                    sink.send(FileEvent::Delete(path));
                }
            }
            RenameMode::To => {
                for path in event.paths {
                    sink.send(FileEvent::Create(path));
                }
            }
            RenameMode::Both if event.paths.len() == 2 => {
                sink.send(FileEvent::Delete(event.paths[0].clone()));
                sink.send(FileEvent::Create(event.paths[1].clone()));
            }
            _ => {
                // 방향을 알 수 없는 rename -- 존재 여부로 판정
                for path in event.paths {
                    if path.exists() {
                        sink.send(FileEvent::Create(path));
                    } else {
                        sink.send(FileEvent::Delete(path));
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            for path in event.paths {
                sink.send(FileEvent::Update(path));
            }
        }
        _ => {}
    }
}

impl NativeWatcher {
    /// 네이티브 백엔드를 생성합니다. fd 한도 초과 등으로 실패할 수
    /// 있으며, 그 경우 호출자가 폴링으로 폴백합니다.
    pub(crate) fn new(sink: EventSink) -> Result<Self, TailError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => dispatch(&sink, event),
                Err(e) => sink.error(e),
            }
        })
        .map_err(|e| TailError::Watcher(e.to_string()))?;

        Ok(Self {
            inner: Mutex::new(Some(watcher)),
        })
    }

    pub(crate) fn observe(&self, path: &Path) -> Result<(), TailError> {
        let mut guard = self.inner.lock().expect("watcher lock poisoned");
        let Some(watcher) = guard.as_mut() else {
            return Err(TailError::Watcher("watcher is closed".to_owned()));
        };
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| TailError::Watcher(e.to_string()))
    }

    pub(crate) fn close(&self) {
        self.inner.lock().expect("watcher lock poisoned").take();
    }
}
