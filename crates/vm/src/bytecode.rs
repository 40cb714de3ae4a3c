//! 바이트코드 파일 코덱
//!
//! 형식 (모두 little-endian):
//!
//! ```text
//! magic: 4B = "LMBC"
//! version: u16
//! program name: u32 len + UTF-8
//! string pool: u32 count, 각 항목 u32 len + UTF-8
//! regex pool: u32 count, 각 항목 u32 len + UTF-8 (패턴 원문)
//! metric table: u32 count, 각 항목 {name, kind: u8, keys: u32 count + 문자열들}
//! instr array: u32 count, 각 항목 (opcode: u8, operand: i32, source_line: u32)
//! ```
//!
//! 디코딩은 정규식을 재컴파일하고, 메트릭 디스크립터를 저장소에
//! 등록(또는 기존 핸들 재사용)하여 실행 가능한 [`Program`]을 복원합니다.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use regex::Regex;

use logmet_metrics::{Kind, MetricStore};

use crate::error::VmError;
use crate::instr::{Instr, Opcode};
use crate::program::Program;

/// 파일 매직
pub const MAGIC: [u8; 4] = *b"LMBC";

/// 지원하는 형식 버전
pub const VERSION: u16 = 1;

fn kind_to_u8(kind: Kind) -> u8 {
    match kind {
        Kind::Counter => 0,
        Kind::Gauge => 1,
        Kind::Timer => 2,
        Kind::Histogram => 3,
        Kind::Text => 4,
    }
}

fn kind_from_u8(byte: u8) -> Result<Kind, VmError> {
    match byte {
        0 => Ok(Kind::Counter),
        1 => Ok(Kind::Gauge),
        2 => Ok(Kind::Timer),
        3 => Ok(Kind::Histogram),
        4 => Ok(Kind::Text),
        other => Err(VmError::UnknownOpcode(other)),
    }
}

/// 프로그램을 바이트코드로 인코딩합니다.
pub fn encode(program: &Program) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(&MAGIC);
    buf.put_u16_le(VERSION);

    put_string(&mut buf, &program.name);

    buf.put_u32_le(program.strings.len() as u32);
    for s in &program.strings {
        put_string(&mut buf, s);
    }

    buf.put_u32_le(program.regexes.len() as u32);
    for re in &program.regexes {
        put_string(&mut buf, re.as_str());
    }

    buf.put_u32_le(program.metrics.len() as u32);
    for metric in &program.metrics {
        put_string(&mut buf, &metric.name);
        buf.put_u8(kind_to_u8(metric.kind));
        buf.put_u32_le(metric.keys.len() as u32);
        for key in &metric.keys {
            put_string(&mut buf, key);
        }
    }

    buf.put_u32_le(program.instrs.len() as u32);
    for instr in &program.instrs {
        buf.put_u8(instr.opcode as u8);
        buf.put_i32_le(instr.operand);
        buf.put_u32_le(instr.source_line);
    }

    buf.freeze()
}

/// 바이트코드를 디코딩하여 프로그램을 복원합니다.
///
/// 메트릭 디스크립터는 `store`에 등록되며, 같은 형태의 메트릭이
/// 이미 있으면 그 핸들을 재사용합니다.
pub fn decode(mut bytes: &[u8], store: &MetricStore) -> Result<Program, VmError> {
    let buf = &mut bytes;

    let mut magic = [0u8; 4];
    take_exact(buf, &mut magic)?;
    if magic != MAGIC {
        return Err(VmError::BadMagic(magic));
    }
    let version = take_u16(buf)?;
    if version != VERSION {
        return Err(VmError::BadVersion(version));
    }

    let name = take_string(buf)?;

    let string_count = take_u32(buf)? as usize;
    let mut strings = Vec::with_capacity(string_count.min(1024));
    for _ in 0..string_count {
        strings.push(take_string(buf)?);
    }

    let regex_count = take_u32(buf)? as usize;
    let mut regexes = Vec::with_capacity(regex_count.min(1024));
    for _ in 0..regex_count {
        let pattern = take_string(buf)?;
        regexes.push(Regex::new(&pattern)?);
    }

    let metric_count = take_u32(buf)? as usize;
    let mut metrics = Vec::with_capacity(metric_count.min(1024));
    for _ in 0..metric_count {
        let metric_name = take_string(buf)?;
        let kind = kind_from_u8(take_u8(buf)?)?;
        let key_count = take_u32(buf)? as usize;
        let mut keys = Vec::with_capacity(key_count.min(64));
        for _ in 0..key_count {
            keys.push(take_string(buf)?);
        }
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        metrics.push(store.new_metric(&name, &metric_name, kind, &key_refs)?);
    }

    let instr_count = take_u32(buf)? as usize;
    let mut instrs = Vec::with_capacity(instr_count.min(65536));
    for _ in 0..instr_count {
        let opcode = Opcode::try_from(take_u8(buf)?)?;
        let operand = take_i32(buf)?;
        let source_line = take_u32(buf)?;
        instrs.push(Instr::with_source(opcode, operand, source_line));
    }

    Ok(Program {
        name,
        instrs,
        strings,
        regexes,
        metrics,
    })
}

// ─── 버퍼 헬퍼 ──────────────────────────────────────────────────────

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn ensure(buf: &&[u8], need: usize) -> Result<(), VmError> {
    if buf.remaining() < need {
        Err(VmError::Truncated {
            expected: need - buf.remaining(),
        })
    } else {
        Ok(())
    }
}

fn take_exact(buf: &mut &[u8], out: &mut [u8]) -> Result<(), VmError> {
    ensure(buf, out.len())?;
    buf.copy_to_slice(out);
    Ok(())
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, VmError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> Result<u16, VmError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, VmError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn take_i32(buf: &mut &[u8]) -> Result<i32, VmError> {
    ensure(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn take_string(buf: &mut &[u8]) -> Result<String, VmError> {
    let len = take_u32(buf)? as usize;
    ensure(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| VmError::InvalidUtf8)
}
