//! Tailer — 패턴 집합 추적과 스트림 수명 관리
//!
//! 슈퍼바이저 태스크가 와처 이벤트와 재스캔 틱을 처리하고, 스트림
//! 워커가 라인을 읽어 라인 채널로 보내면, 디스패치 태스크가 채널을
//! 비우며 [`LineProcessor`]를 순서대로 호출합니다. 단일 소스의 라인
//! 순서는 채널의 FIFO로 끝-대-끝 보존됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! Watcher -> supervisor -> (wake) -> stream workers -> mpsc -> dispatch -> LineProcessor
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logmet_core::{FileEvent, FileEventProcessor, LineProcessor, LogLine};

use crate::error::TailError;
use crate::logstream::{self, StreamContext, StreamHandle};
use crate::waker::{TimerWaker, Waker};
use crate::watcher::LogWatcher;

/// 테일러 설정
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// 신규 파일 유예 기간 (D >= 0). 0이면 즉시 읽기 시작.
    pub new_file_grace: Duration,
    /// 패턴 재스캔 주기
    pub rescan_interval: Duration,
    /// 기본 웨이커의 발화 주기
    pub wake_interval: Duration,
    /// 폴링 와처의 stat 주기
    pub poll_interval: Duration,
    /// 네이티브 와처 백엔드 시도 여부
    pub enable_native_watcher: bool,
    /// 한 번의 읽기에 쓸 버퍼 크기 (바이트)
    pub read_buffer_size: usize,
    /// 라인 채널 용량
    pub line_channel_capacity: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            new_file_grace: Duration::ZERO,
            rescan_interval: Duration::from_secs(60),
            wake_interval: Duration::from_millis(250),
            poll_interval: Duration::from_millis(250),
            enable_native_watcher: true,
            read_buffer_size: 4096,
            line_channel_capacity: 1024,
        }
    }
}

impl TailerConfig {
    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), TailError> {
        if self.read_buffer_size == 0 {
            return Err(TailError::Config {
                field: "read_buffer_size".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.line_channel_capacity == 0 {
            return Err(TailError::Config {
                field: "line_channel_capacity".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.rescan_interval.is_zero() {
            return Err(TailError::Config {
                field: "rescan_interval".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// 슈퍼바이저/테일러가 공유하는 상태
struct Shared {
    cancel: CancellationToken,
    waker: Arc<dyn Waker>,
    watcher: LogWatcher,
    /// close() 시 take하여 채널을 닫음
    lines_tx: StdMutex<Option<mpsc::Sender<LogLine>>>,
    synth_tx: mpsc::UnboundedSender<FileEvent>,
    patterns: StdMutex<Vec<glob::Pattern>>,
    streams: Mutex<HashMap<String, StreamHandle>>,
    observers: StdMutex<Vec<(PathBuf, Arc<dyn FileEventProcessor>)>>,
    read_buffer_size: usize,
    new_file_grace: Duration,
}

impl Shared {
    fn stream_ctx(&self) -> Result<StreamContext, TailError> {
        let lines_tx = self
            .lines_tx
            .lock()
            .expect("tailer lock poisoned")
            .clone()
            .ok_or_else(|| TailError::Channel("tailer is closed".to_owned()))?;
        Ok(StreamContext {
            lines_tx,
            events_tx: Some(self.synth_tx.clone()),
            waker: Arc::clone(&self.waker),
            cancel: self.cancel.clone(),
            read_buffer_size: self.read_buffer_size,
            new_file_grace: self.new_file_grace,
        })
    }

    /// 경로에 대한 스트림을 엽니다. 이미 활성 스트림이 있으면 무시하고,
    /// 완료된 스트림은 조인한 뒤 새 스트림으로 교체합니다.
    async fn open_stream(&self, pathname: &str) -> Result<(), TailError> {
        {
            let mut streams = self.streams.lock().await;
            if let Some(handle) = streams.get_mut(pathname) {
                if !handle.is_complete() {
                    return Ok(());
                }
                handle.join().await;
            }
        }

        let handle = logstream::new_stream(pathname, self.stream_ctx()?).await?;
        info!(source = pathname, "tailing new stream");
        self.streams
            .lock()
            .await
            .insert(pathname.to_owned(), handle);
        Ok(())
    }

    /// 모든 패턴을 다시 glob하여 놓친 파일을 엽니다.
    async fn open_pattern_matches(&self) {
        let patterns: Vec<glob::Pattern> = self
            .patterns
            .lock()
            .expect("tailer lock poisoned")
            .clone();
        for pattern in patterns {
            let Ok(paths) = glob::glob(pattern.as_str()) else {
                continue;
            };
            for path in paths.flatten() {
                if path.is_dir() {
                    continue;
                }
                let pathname = path.display().to_string();
                if let Err(e) = self.open_stream(&pathname).await {
                    debug!(source = %pathname, error = %e, "could not open stream");
                }
            }
        }
    }

    fn matches_any_pattern(&self, path: &Path) -> bool {
        self.patterns
            .lock()
            .expect("tailer lock poisoned")
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    /// 구독한 관찰자에게 이벤트를 중계합니다.
    fn notify_observers(&self, event: &FileEvent) {
        let observers = self.observers.lock().expect("tailer lock poisoned");
        for (dir, processor) in observers.iter() {
            if event.pathname().starts_with(dir) {
                processor.process_file_event(event);
            }
        }
    }

    /// 와처 이벤트 하나를 처리합니다.
    async fn handle_event(&self, event: FileEvent) {
        self.notify_observers(&event);

        match &event {
            FileEvent::Create(path) => {
                // 디렉토리 Create는 무시
                if path.is_dir() {
                    return;
                }
                if self.matches_any_pattern(path) {
                    let pathname = path.display().to_string();
                    if let Err(e) = self.open_stream(&pathname).await {
                        warn!(source = %pathname, error = %e, "failed to open created file");
                    }
                }
            }
            FileEvent::Update(path) => {
                let pathname = path.display().to_string();
                let known = self.streams.lock().await.contains_key(&pathname);
                if !known && self.matches_any_pattern(path) && path.is_file() {
                    // Create를 놓친 경우 보완
                    if let Err(e) = self.open_stream(&pathname).await {
                        debug!(source = %pathname, error = %e, "could not open updated file");
                    }
                }
                self.waker.wake_all();
            }
            FileEvent::Delete(_) => {
                // 디렉토리 Delete는 스트림 맵에 없으므로 자연히 무시됨.
                // 파일 스트림은 EOF에서 ENOENT를 감지해 남은 바이트를
                // 드레인한 뒤 스스로 완료하므로 깨우기만 하면 됨.
                self.waker.wake_all();
            }
            FileEvent::Truncate(_) => {
                // 스트림이 자체 처리함 -- 관찰자 통지만 수행
            }
        }
    }
}

/// 로그 테일러
///
/// # 사용 예시
/// ```ignore
/// let mut tailer = TailerBuilder::new()
///     .processor(Arc::new(runtime))
///     .build()?;
/// tailer.start()?;
/// tailer.tail_path("/var/log/*.log").await?;
/// // ...
/// tailer.close().await?;
/// ```
pub struct Tailer {
    config: TailerConfig,
    shared: Arc<Shared>,
    processor: Arc<dyn LineProcessor>,
    watcher_rx: Option<mpsc::UnboundedReceiver<FileEvent>>,
    synth_rx: Option<mpsc::UnboundedReceiver<FileEvent>>,
    lines_rx: Option<mpsc::Receiver<LogLine>>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Tailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tailer")
            .field("config", &self.config)
            .finish()
    }
}

impl Tailer {
    /// 슈퍼바이저와 디스패치 태스크를 시작합니다.
    pub fn start(&mut self) -> Result<(), TailError> {
        let mut watcher_rx = self
            .watcher_rx
            .take()
            .ok_or_else(|| TailError::Channel("tailer already started".to_owned()))?;
        let mut synth_rx = self
            .synth_rx
            .take()
            .ok_or_else(|| TailError::Channel("tailer already started".to_owned()))?;
        let mut lines_rx = self
            .lines_rx
            .take()
            .ok_or_else(|| TailError::Channel("tailer already started".to_owned()))?;

        // 디스패치: 라인 채널을 비우며 프로세서를 순서대로 호출
        let processor = Arc::clone(&self.processor);
        let dispatch = tokio::spawn(async move {
            while let Some(line) = lines_rx.recv().await {
                processor.process_line(line).await;
            }
        });

        // 슈퍼바이저: 와처 이벤트, 합성 이벤트, 재스캔
        let shared = Arc::clone(&self.shared);
        let cancel = self.shared.cancel.clone();
        let rescan_interval = self.config.rescan_interval;
        let supervisor = tokio::spawn(async move {
            let mut rescan = tokio::time::interval(rescan_interval);
            rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            rescan.tick().await; // 즉시 발화하는 첫 틱 소비

            loop {
                tokio::select! {
                    Some(event) = watcher_rx.recv() => shared.handle_event(event).await,
                    Some(event) = synth_rx.recv() => shared.notify_observers(&event),
                    _ = rescan.tick() => shared.open_pattern_matches().await,
                    _ = cancel.cancelled() => break,
                }
            }
        });

        self.tasks.push(dispatch);
        self.tasks.push(supervisor);
        info!("tailer started");
        Ok(())
    }

    /// glob 패턴을 추가합니다.
    ///
    /// 기존 매치는 즉시 열리고, 이후 매치는 Create 이벤트로 열립니다.
    /// `unix:`/`tcp:` 접두사는 소켓 스트림으로 바로 연결됩니다.
    pub async fn tail_path(&self, pattern: &str) -> Result<(), TailError> {
        if pattern.starts_with("unix:") || pattern.starts_with("tcp:") {
            return self.shared.open_stream(pattern).await;
        }

        let compiled = glob::Pattern::new(pattern).map_err(|e| TailError::Pattern {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;
        {
            let mut patterns = self.shared.patterns.lock().expect("tailer lock poisoned");
            if !patterns.iter().any(|p| p.as_str() == pattern) {
                patterns.push(compiled);
            }
        }

        // 패턴의 비-glob 조상 디렉토리를 관찰하여 Create 이벤트를 받음
        let base = watch_base(pattern);
        self.shared.watcher.observe(&base)?;

        // 기존 매치 열기
        let paths = glob::glob(pattern).map_err(|e| TailError::Pattern {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;
        for path in paths.flatten() {
            if path.is_dir() {
                continue;
            }
            let pathname = path.display().to_string();
            self.shared.open_stream(&pathname).await?;
        }
        Ok(())
    }

    /// 디렉토리 아래의 파일 이벤트를 프로세서에 구독시킵니다.
    pub fn observe(
        &self,
        dir: impl AsRef<Path>,
        processor: Arc<dyn FileEventProcessor>,
    ) -> Result<(), TailError> {
        let dir = dir.as_ref();
        self.shared.watcher.observe(dir)?;
        self.shared
            .observers
            .lock()
            .expect("tailer lock poisoned")
            .push((dir.to_owned(), processor));
        Ok(())
    }

    /// 현재 활성(미완료) 스트림 수를 반환합니다.
    pub async fn active_stream_count(&self) -> usize {
        let streams = self.shared.streams.lock().await;
        streams.values().filter(|h| !h.is_complete()).count()
    }

    /// 모든 스트림이 완료되었는지 확인합니다.
    pub async fn all_streams_complete(&self) -> bool {
        let streams = self.shared.streams.lock().await;
        streams.values().all(|h| h.is_complete())
    }

    /// 테일러를 종료합니다.
    ///
    /// 모든 스트림을 드레인하고, 이미 디스크에서 읽힌 라인이 전부
    /// 프로세서에 전달된 뒤에 반환합니다.
    pub async fn close(&mut self) -> Result<(), TailError> {
        info!("closing tailer");
        self.shared.cancel.cancel();
        self.shared.waker.wake_all();

        // 1. 스트림 워커 조인 (취소 경로에서 잔여 플러시까지 수행됨)
        {
            let mut streams = self.shared.streams.lock().await;
            for handle in streams.values_mut() {
                handle.join().await;
            }
        }

        // 2. 라인 채널을 닫아 디스패처가 드레인 후 끝나게 함
        self.shared
            .lines_tx
            .lock()
            .expect("tailer lock poisoned")
            .take();

        // 3. 디스패처/슈퍼바이저 조인 -- 전달 보장
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        self.shared.watcher.close();
        info!("tailer closed");
        Ok(())
    }
}

/// 패턴에서 glob 메타문자가 없는 가장 깊은 조상 디렉토리를 구합니다.
fn watch_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for comp in Path::new(pattern).components() {
        let text = comp.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[']) {
            break;
        }
        base.push(comp);
    }
    if base.as_os_str().is_empty() {
        return PathBuf::from(".");
    }
    if base.is_dir() {
        base
    } else {
        base.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// 테일러 빌더
pub struct TailerBuilder {
    config: TailerConfig,
    processor: Option<Arc<dyn LineProcessor>>,
    waker: Option<Arc<dyn Waker>>,
    watcher: Option<LogWatcher>,
}

impl TailerBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: TailerConfig::default(),
            processor: None,
            waker: None,
            watcher: None,
        }
    }

    /// 테일러 설정을 지정합니다.
    pub fn config(mut self, config: TailerConfig) -> Self {
        self.config = config;
        self
    }

    /// 라인 프로세서를 지정합니다 (필수).
    pub fn processor(mut self, processor: Arc<dyn LineProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// 웨이커를 교체합니다. 지정하지 않으면 [`TimerWaker`]를 사용합니다.
    pub fn waker(mut self, waker: Arc<dyn Waker>) -> Self {
        self.waker = Some(waker);
        self
    }

    /// 와처를 교체합니다. 지정하지 않으면 설정에 따라 생성합니다.
    pub fn watcher(mut self, watcher: LogWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// 테일러를 빌드합니다.
    pub fn build(self) -> Result<Tailer, TailError> {
        self.config.validate()?;

        let processor = self.processor.ok_or_else(|| TailError::Config {
            field: "processor".to_owned(),
            reason: "a LineProcessor is required".to_owned(),
        })?;

        let cancel = CancellationToken::new();
        let waker: Arc<dyn Waker> = match self.waker {
            Some(waker) => waker,
            None => TimerWaker::new(self.config.wake_interval, cancel.child_token()),
        };
        let mut watcher = match self.watcher {
            Some(watcher) => watcher,
            None => LogWatcher::new(self.config.poll_interval, self.config.enable_native_watcher)?,
        };
        let watcher_rx = watcher
            .take_events()
            .ok_or_else(|| TailError::Channel("watcher events already taken".to_owned()))?;

        let (lines_tx, lines_rx) = mpsc::channel(self.config.line_channel_capacity);
        let (synth_tx, synth_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            cancel,
            waker,
            watcher,
            lines_tx: StdMutex::new(Some(lines_tx)),
            synth_tx,
            patterns: StdMutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            observers: StdMutex::new(Vec::new()),
            read_buffer_size: self.config.read_buffer_size,
            new_file_grace: self.config.new_file_grace,
        });

        Ok(Tailer {
            config: self.config,
            shared,
            processor,
            watcher_rx: Some(watcher_rx),
            synth_rx: Some(synth_rx),
            lines_rx: Some(lines_rx),
            tasks: Vec::new(),
        })
    }
}

impl Default for TailerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
