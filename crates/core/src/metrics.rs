//! 내부 카운터 상수 및 설명 등록
//!
//! 코어가 외부에 공개하는 expvar 스타일 카운터의 이름과 설명을
//! 중앙에서 정의합니다. 각 모듈은 이 상수를 사용하여
//! `metrics::counter!()` 매크로를 호출합니다.
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logmet_core::metrics::LOG_LINES_TOTAL,
//!          logmet_core::metrics::LABEL_SOURCE => source.clone())
//!     .increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 감시 경로 레이블 키
pub const LABEL_PATH: &str = "path";

/// 라인 소스 레이블 키 (파일 경로, 파이프, 소켓 주소)
pub const LABEL_SOURCE: &str = "source";

/// 프로그램 이름 레이블 키
pub const LABEL_PROGRAM: &str = "program";

// ─── 와처 카운터 ────────────────────────────────────────────────────

/// 와처가 전달한 이벤트 수 (counter, label: path)
pub const LOG_WATCHER_EVENT_COUNT: &str = "log_watcher_event_count";

/// 와처 내부 에러 수 (counter)
pub const LOG_WATCHER_ERRORS_TOTAL: &str = "log_watcher_errors_total";

/// 네이티브 백엔드 생성 실패로 폴링 폴백한 횟수 (counter)
pub const WATCHER_FALLBACK_TOTAL: &str = "watcher_fallback_total";

// ─── 스트림 카운터 ──────────────────────────────────────────────────

/// 소스별 수신 라인 수 (counter, label: source)
pub const LOG_LINES_TOTAL: &str = "log_lines_total";

/// 소스별 수신 바이트 수 (counter, label: source)
pub const LOG_BYTES_TOTAL: &str = "log_bytes_total";

/// 소스별 로테이션 감지 수 (counter, label: source)
pub const LOG_ROTATIONS_TOTAL: &str = "log_rotations_total";

/// 소스별 절단 감지 수 (counter, label: source)
pub const LOG_TRUNCATIONS_TOTAL: &str = "log_truncations_total";

// ─── VM 카운터 ──────────────────────────────────────────────────────

/// 프로그램별 런타임 에러 수 (counter, label: program)
pub const PROG_RUNTIME_ERRORS_TOTAL: &str = "prog_runtime_errors_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 카운터의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 호스트 프로세스의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::describe_counter;

    describe_counter!(
        LOG_WATCHER_EVENT_COUNT,
        "Filesystem events delivered by the watcher, keyed by path"
    );
    describe_counter!(
        LOG_WATCHER_ERRORS_TOTAL,
        "Internal watcher errors (logged, never fatal)"
    );
    describe_counter!(
        WATCHER_FALLBACK_TOTAL,
        "Times the native watcher backend failed and polling was used instead"
    );
    describe_counter!(
        LOG_LINES_TOTAL,
        "Log lines emitted per source into the line channel"
    );
    describe_counter!(LOG_BYTES_TOTAL, "Bytes consumed per source");
    describe_counter!(
        LOG_ROTATIONS_TOTAL,
        "Log file rotations detected per source"
    );
    describe_counter!(
        LOG_TRUNCATIONS_TOTAL,
        "Log file truncations detected per source"
    );
    describe_counter!(
        PROG_RUNTIME_ERRORS_TOTAL,
        "Runtime errors raised per program during line execution"
    );
}
