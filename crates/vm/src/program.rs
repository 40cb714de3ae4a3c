//! Program — 명령어, 상수 풀, 메트릭 핸들 테이블
//!
//! 컴파일러 백엔드 또는 바이트코드 로더가 생성하며, 로드 이후
//! 불변입니다. 정규식은 로드 시점에 한 번만 컴파일하여 캐싱합니다.
//! 정수 상수는 문자열 풀에 십진 문자열로 저장되고 `s2i`로 변환되거나,
//! `iadd` 계열의 피연산자 즉치값으로 인코딩됩니다.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use logmet_metrics::Metric;

use crate::error::VmError;
use crate::instr::{Instr, Opcode};

/// 컴파일된 바이트코드 단위
///
/// VM 하나가 프로그램 하나를 소유하며, 메트릭 핸들은 저장소와
/// 공유되는 읽기 전용 참조입니다.
#[derive(Debug)]
pub struct Program {
    /// 프로그램 이름
    pub name: String,
    /// 명령어 배열
    pub instrs: Vec<Instr>,
    /// 문자열 상수 풀
    pub strings: Vec<String>,
    /// 컴파일된 정규식 풀
    pub regexes: Vec<Regex>,
    /// 메트릭 핸들 테이블 (`mload` 피연산자가 인덱싱)
    pub metrics: Vec<Arc<Metric>>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {} ({} instrs)", self.name, self.instrs.len())?;
        for (i, instr) in self.instrs.iter().enumerate() {
            writeln!(f, "  {i:4} {instr}")?;
        }
        Ok(())
    }
}

/// 프로그램 빌더
///
/// 풀에 상수를 추가하면 인덱스를 돌려주므로, 명령어 피연산자를
/// 직접 계산하지 않고 조립할 수 있습니다.
///
/// # 사용 예시
/// ```ignore
/// let mut b = ProgramBuilder::new("errors");
/// let re = b.regex("^ERROR")?;
/// let errs = b.metric(store.new_metric("errors", "errs", Kind::Counter, &[])?);
/// b.instr(Opcode::Match, re as i32);
/// b.instr(Opcode::Jnm, 5);
/// b.instr(Opcode::Mload, errs as i32);
/// b.instr(Opcode::Dload, 0);
/// b.instr(Opcode::Iadd, 1);
/// b.instr(Opcode::Stop, 0);
/// let program = b.build();
/// ```
pub struct ProgramBuilder {
    name: String,
    instrs: Vec<Instr>,
    strings: Vec<String>,
    regexes: Vec<Regex>,
    metrics: Vec<Arc<Metric>>,
}

impl ProgramBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instrs: Vec::new(),
            strings: Vec::new(),
            regexes: Vec::new(),
            metrics: Vec::new(),
        }
    }

    /// 문자열 상수를 풀에 추가하고 인덱스를 반환합니다.
    ///
    /// 동일한 문자열은 한 번만 저장됩니다.
    pub fn string(&mut self, s: impl Into<String>) -> usize {
        let s = s.into();
        if let Some(idx) = self.strings.iter().position(|existing| *existing == s) {
            return idx;
        }
        self.strings.push(s);
        self.strings.len() - 1
    }

    /// 정규식 패턴을 컴파일하여 풀에 추가하고 인덱스를 반환합니다.
    pub fn regex(&mut self, pattern: &str) -> Result<usize, VmError> {
        let re = Regex::new(pattern)?;
        self.regexes.push(re);
        Ok(self.regexes.len() - 1)
    }

    /// 메트릭 핸들을 테이블에 추가하고 인덱스를 반환합니다.
    pub fn metric(&mut self, metric: Arc<Metric>) -> usize {
        self.metrics.push(metric);
        self.metrics.len() - 1
    }

    /// 명령어를 추가합니다 (소스 라인 0).
    pub fn instr(&mut self, opcode: Opcode, operand: i32) -> &mut Self {
        self.instrs.push(Instr::new(opcode, operand));
        self
    }

    /// 소스 라인을 지정하여 명령어를 추가합니다.
    pub fn instr_at(&mut self, opcode: Opcode, operand: i32, source_line: u32) -> &mut Self {
        self.instrs
            .push(Instr::with_source(opcode, operand, source_line));
        self
    }

    /// 다음에 추가될 명령어의 인덱스를 반환합니다 (점프 대상 계산용).
    pub fn next_instr_index(&self) -> usize {
        self.instrs.len()
    }

    /// 프로그램을 완성합니다.
    pub fn build(self) -> Program {
        Program {
            name: self.name,
            instrs: self.instrs,
            strings: self.strings,
            regexes: self.regexes,
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logmet_metrics::{Kind, MetricStore};

    #[test]
    fn string_pool_deduplicates() {
        let mut b = ProgramBuilder::new("p");
        let a = b.string("fmt");
        let c = b.string("other");
        let d = b.string("fmt");
        assert_eq!(a, d);
        assert_ne!(a, c);
    }

    #[test]
    fn invalid_regex_fails_at_build_time() {
        let mut b = ProgramBuilder::new("p");
        assert!(matches!(b.regex("[invalid"), Err(VmError::Regex(_))));
    }

    #[test]
    fn builder_assembles_program() {
        let store = MetricStore::new();
        let mut b = ProgramBuilder::new("errors");
        let re = b.regex("^ERROR").unwrap();
        let m = b.metric(store.new_metric("errors", "errs", Kind::Counter, &[]).unwrap());
        b.instr(Opcode::Match, re as i32);
        b.instr(Opcode::Jnm, 6);
        b.instr(Opcode::Mload, m as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Iadd, 1);
        b.instr(Opcode::Stop, 0);

        let program = b.build();
        assert_eq!(program.name, "errors");
        assert_eq!(program.instrs.len(), 6);
        assert_eq!(program.regexes.len(), 1);
        assert_eq!(program.metrics.len(), 1);
    }

    #[test]
    fn display_lists_instructions() {
        let mut b = ProgramBuilder::new("p");
        b.instr(Opcode::Stop, 0);
        let text = b.build().to_string();
        assert!(text.contains("program p"));
        assert!(text.contains("{stop 0 0}"));
    }
}
