//! VM 에러 타입
//!
//! 런타임 에러는 VM을 종료시키지 않습니다. [`crate::Runtime`]이 라인을
//! 버리고 프로그램별 에러 카운터를 증가시킨 뒤 다음 라인을 계속합니다.
//! 바이트코드 디코딩 에러는 로드 시점에 호출자에게 반환됩니다.

use logmet_core::LogmetError;
use logmet_metrics::MetricsError;

/// VM 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// 스택에 피연산자가 부족함
    #[error("stack underflow at instruction {ip}")]
    StackUnderflow {
        /// 에러가 발생한 명령어 인덱스
        ip: usize,
    },

    /// 피연산자 타입이 연산과 맞지 않음
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// 기대한 타입
        expected: &'static str,
        /// 실제 타입
        got: &'static str,
    },

    /// 0으로 나누기
    #[error("division by zero")]
    DivisionByZero,

    /// 문자열을 숫자로 변환 실패
    #[error("cannot convert '{input}' to {target}")]
    BadConversion {
        /// 변환 대상 문자열
        input: String,
        /// 목표 타입
        target: &'static str,
    },

    /// 존재하지 않는 캡처 그룹 참조
    #[error("no capture group {0} in last match")]
    MissingCapture(usize),

    /// 풀 또는 점프 대상 범위를 벗어난 피연산자
    #[error("operand {operand} out of range for {what}")]
    BadOperand {
        /// 피연산자 값
        operand: i32,
        /// 범위를 벗어난 대상 (string pool, jump target 등)
        what: &'static str,
    },

    /// 시각 문자열 파싱 실패
    #[error("strptime failed: '{input}' does not match format '{format}'")]
    Strptime {
        /// 입력 문자열
        input: String,
        /// 시각 형식
        format: String,
    },

    /// 메트릭 연산 에러 (레이블 인자 불일치, 음수 카운터 증가 등)
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// 정규식 컴파일 에러 (프로그램 로드 시점)
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// 바이트코드 매직 불일치
    #[error("bad bytecode magic {0:?}")]
    BadMagic([u8; 4]),

    /// 지원하지 않는 바이트코드 버전
    #[error("unsupported bytecode version {0}")]
    BadVersion(u16),

    /// 알 수 없는 opcode 바이트
    #[error("unknown opcode byte {0:#04x}")]
    UnknownOpcode(u8),

    /// 바이트코드가 중간에 끊김
    #[error("truncated bytecode: expected {expected} more bytes")]
    Truncated {
        /// 추가로 필요한 바이트 수
        expected: usize,
    },

    /// 바이트코드 내 문자열이 UTF-8이 아님
    #[error("invalid utf-8 in bytecode string pool")]
    InvalidUtf8,
}

impl From<VmError> for LogmetError {
    fn from(err: VmError) -> Self {
        LogmetError::Vm(err.to_string())
    }
}
