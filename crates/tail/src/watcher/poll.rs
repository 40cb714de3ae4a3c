//! 폴링 와처 백엔드 — 주기적 stat 비교
//!
//! 관찰 경로마다 (존재 여부, mtime, 크기)를 캐시하고 주기마다
//! 비교합니다. 첫 등장은 Create, mtime/크기 변화는 Update, ENOENT는
//! Delete로 방출합니다. 디렉토리는 엔트리를 스캔하여 새로 생긴 자식을
//! Create로 알리고 이후 자동 추적합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use logmet_core::FileEvent;

use super::EventSink;
use crate::error::TailError;

#[derive(Debug, Clone, PartialEq)]
struct PathState {
    exists: bool,
    is_dir: bool,
    mtime: Option<SystemTime>,
    len: u64,
}

impl PathState {
    fn absent() -> Self {
        Self {
            exists: false,
            is_dir: false,
            mtime: None,
            len: 0,
        }
    }

    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            exists: true,
            is_dir: meta.is_dir(),
            mtime: meta.modified().ok(),
            len: meta.len(),
        }
    }
}

pub(crate) struct PollWatcher {
    paths: Arc<Mutex<HashMap<PathBuf, PathState>>>,
    cancel: CancellationToken,
}

impl PollWatcher {
    pub(crate) fn new(interval: Duration, sink: EventSink) -> Self {
        let paths: Arc<Mutex<HashMap<PathBuf, PathState>>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let poll_paths = Arc::clone(&paths);
        let poll_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = timer.tick() => poll_once(&poll_paths, &sink),
                    _ = poll_cancel.cancelled() => break,
                }
            }
        });

        Self { paths, cancel }
    }

    pub(crate) fn observe(&self, path: &Path) -> Result<(), TailError> {
        let mut paths = self.paths.lock().expect("poll state lock poisoned");
        if paths.contains_key(path) {
            return Ok(());
        }

        // 초기 상태를 이벤트 없이 기록 (이미 존재하던 것은 Create가 아님)
        let state = match std::fs::metadata(path) {
            Ok(meta) => PathState::from_metadata(&meta),
            Err(_) => PathState::absent(),
        };
        let is_dir = state.is_dir;
        paths.insert(path.to_owned(), state);

        if is_dir {
            for child in dir_entries(path) {
                if let Ok(meta) = std::fs::metadata(&child) {
                    paths.entry(child).or_insert(PathState::from_metadata(&meta));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// 관찰 중인 모든 경로를 한 번 폴링하여 변화를 방출합니다.
fn poll_once(paths: &Mutex<HashMap<PathBuf, PathState>>, sink: &EventSink) {
    let snapshot: Vec<(PathBuf, PathState)> = {
        let guard = paths.lock().expect("poll state lock poisoned");
        guard.iter().map(|(p, s)| (p.clone(), s.clone())).collect()
    };

    let mut updates: Vec<(PathBuf, PathState)> = Vec::new();
    let mut discovered: Vec<(PathBuf, PathState)> = Vec::new();

    for (path, old) in snapshot {
        let new = match std::fs::metadata(&path) {
            Ok(meta) => PathState::from_metadata(&meta),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PathState::absent(),
            Err(e) => {
                sink.error(format!("stat {}: {e}", path.display()));
                continue;
            }
        };

        match (old.exists, new.exists) {
            (false, true) => sink.send(FileEvent::Create(path.clone())),
            (true, false) => sink.send(FileEvent::Delete(path.clone())),
            (true, true) => {
                // 디렉토리 Update는 자식 변경의 부수효과이므로 억제
                if !new.is_dir && (old.mtime != new.mtime || old.len != new.len) {
                    sink.send(FileEvent::Update(path.clone()));
                }
            }
            (false, false) => {}
        }

        // 디렉토리면 새 자식 탐색
        if new.exists && new.is_dir {
            for child in dir_entries(&path) {
                discovered.push((child, PathState::absent()));
            }
        }

        updates.push((path, new));
    }

    let mut guard = paths.lock().expect("poll state lock poisoned");
    for (path, state) in updates {
        guard.insert(path, state);
    }
    // 새로 발견된 자식은 absent로 등록 -> 다음 폴링에서 Create가 방출됨
    for (child, state) in discovered {
        guard.entry(child).or_insert(state);
    }
}

fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_sink() -> (EventSink, mpsc::UnboundedReceiver<FileEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx), rx)
    }

    async fn expect_event(
        rx: &mut mpsc::UnboundedReceiver<FileEvent>,
        deadline: Duration,
    ) -> FileEvent {
        tokio::time::timeout(deadline, rx.recv())
            .await
            .expect("no event before deadline")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn create_update_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = make_sink();
        let watcher = PollWatcher::new(Duration::from_millis(20), sink);
        watcher.observe(dir.path()).unwrap();

        let logfile = dir.path().join("logfile");
        std::fs::write(&logfile, b"").unwrap();
        let event = expect_event(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(event, FileEvent::Create(logfile.clone()));

        // mtime 해상도 문제를 피하기 위해 크기도 변경
        std::fs::write(&logfile, b"hi").unwrap();
        let event = expect_event(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(event, FileEvent::Update(logfile.clone()));

        std::fs::remove_file(&logfile).unwrap();
        // 디렉토리 Update가 섞일 수 있으므로 Delete가 나올 때까지 읽음
        loop {
            let event = expect_event(&mut rx, Duration::from_secs(2)).await;
            if let FileEvent::Delete(p) = &event {
                assert_eq!(*p, logfile);
                break;
            }
        }

        watcher.close();
    }

    #[tokio::test]
    async fn observe_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _rx) = make_sink();
        let watcher = PollWatcher::new(Duration::from_millis(20), sink);
        watcher.observe(dir.path()).unwrap();
        watcher.observe(dir.path()).unwrap();
        watcher.close();
    }

    #[tokio::test]
    async fn preexisting_children_do_not_emit_create() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.log");
        std::fs::write(&existing, b"old").unwrap();

        let (sink, mut rx) = make_sink();
        let watcher = PollWatcher::new(Duration::from_millis(20), sink);
        watcher.observe(dir.path()).unwrap();

        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err(), "unexpected event for pre-existing child");
        watcher.close();
    }
}
