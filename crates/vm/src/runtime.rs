//! Runtime — 로드된 프로그램 집합과 라인 디스패치
//!
//! 테일러가 전달하는 라인마다 모든 프로그램을 순서대로 실행합니다.
//! 프로그램마다 새 VM 상태로 실행하므로 한 라인의 결과가 다음 라인에
//! 영향을 주지 않습니다. 런타임 에러는 라인을 버리고
//! `prog_runtime_errors_total` 카운터만 증가시킵니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

use logmet_core::metrics::{LABEL_PROGRAM, PROG_RUNTIME_ERRORS_TOTAL};
use logmet_core::{BoxFuture, LineProcessor, LogLine};

use crate::program::Program;
use crate::vm::Vm;

struct ProgramEntry {
    program: Arc<Program>,
    runtime_errors: AtomicU64,
}

/// 프로그램 집합에 대한 라인 프로세서
///
/// # 사용 예시
/// ```ignore
/// let mut runtime = Runtime::new();
/// runtime.load(program);
/// let processor: Arc<dyn LineProcessor> = Arc::new(runtime);
/// // processor를 테일러에 연결
/// ```
#[derive(Default)]
pub struct Runtime {
    programs: Vec<ProgramEntry>,
}

impl Runtime {
    /// 빈 런타임을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 프로그램을 로드합니다. 로드 이후 프로그램은 불변입니다.
    pub fn load(&mut self, program: Program) {
        self.load_arc(Arc::new(program));
    }

    /// 공유 프로그램 핸들을 로드합니다.
    pub fn load_arc(&mut self, program: Arc<Program>) {
        tracing::info!(program = %program.name, instrs = program.instrs.len(), "loaded program");
        self.programs.push(ProgramEntry {
            program,
            runtime_errors: AtomicU64::new(0),
        });
    }

    /// 로드된 프로그램 수를 반환합니다.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// 프로그램의 누적 런타임 에러 수를 반환합니다.
    pub fn runtime_errors(&self, program_name: &str) -> Option<u64> {
        self.programs
            .iter()
            .find(|entry| entry.program.name == program_name)
            .map(|entry| entry.runtime_errors.load(Ordering::Relaxed))
    }
}

impl LineProcessor for Runtime {
    fn process_line(&self, line: LogLine) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for entry in &self.programs {
                let mut vm = Vm::new(Arc::clone(&entry.program));
                if let Err(e) = vm.run(&line.line) {
                    entry.runtime_errors.fetch_add(1, Ordering::Relaxed);
                    counter!(
                        PROG_RUNTIME_ERRORS_TOTAL,
                        LABEL_PROGRAM => entry.program.name.clone()
                    )
                    .increment(1);
                    tracing::debug!(
                        program = %entry.program.name,
                        source = %line.filename,
                        error = %e,
                        "runtime error, line dropped"
                    );
                }
            }
        })
    }
}
