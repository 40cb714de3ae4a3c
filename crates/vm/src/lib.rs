#![doc = include_str!("../README.md")]

pub mod bytecode;
pub mod error;
pub mod instr;
pub mod program;
pub mod runtime;
pub mod value;
pub mod vm;

// --- 주요 타입 re-export ---

pub use error::VmError;
pub use instr::{Instr, Opcode};
pub use program::{Program, ProgramBuilder};
pub use runtime::Runtime;
pub use value::Value;
pub use vm::Vm;
