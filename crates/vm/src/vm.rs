//! 스택 VM — 라인 하나에 대한 프로그램 실행
//!
//! 실행 계약:
//! 1. 라인을 입력 레지스터에 싣고, 스택과 매치 레지스터를 비우고,
//!    명령어 포인터를 0으로 되돌립니다.
//! 2. `stop`/`ret` 또는 명령어 배열의 끝까지 실행합니다.
//! 3. 런타임 에러는 `Err`로 반환되고 호출자([`crate::Runtime`])가
//!    라인을 버립니다. VM 자체는 다음 라인을 계속 처리할 수 있습니다.
//!
//! 스택과 프로그램 상태가 라인마다 초기화되므로, 한 번의 실행은
//! 저장소 쓰기를 제외하면 `(program, line)`의 순수 함수입니다.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::VmError;
use crate::instr::{Instr, Opcode};
use crate::program::Program;
use crate::value::Value;

/// 라인 단위 스택 머신
///
/// 인스턴스 하나가 프로그램 하나에 전속됩니다. 단일 스레드에서
/// 동작하며, 서로 다른 소스의 라인에 대해 여러 VM이 병렬로 실행될
/// 수 있습니다.
#[derive(Debug)]
pub struct Vm {
    program: Arc<Program>,
    stack: Vec<Value>,
    /// 마지막 `match`의 캡처 그룹 (0번은 전체 매치)
    captures: Option<Vec<Option<String>>>,
    /// `settime`이 설정한 라인 시각. 없으면 Datum 갱신에 현재 시각 사용.
    time: Option<DateTime<Utc>>,
    ip: usize,
}

impl Vm {
    /// 프로그램에 전속된 새 VM을 생성합니다.
    pub fn new(program: Arc<Program>) -> Self {
        Self {
            program,
            stack: Vec::with_capacity(16),
            captures: None,
            time: None,
            ip: 0,
        }
    }

    /// 프로그램 이름을 반환합니다.
    pub fn program_name(&self) -> &str {
        &self.program.name
    }

    /// 라인 하나에 대해 프로그램을 실행합니다.
    ///
    /// 매 호출마다 VM 상태를 초기화합니다. 런타임 에러 시 해당 라인의
    /// 남은 명령은 실행되지 않지만 VM은 재사용 가능합니다.
    pub fn run(&mut self, line: &str) -> Result<(), VmError> {
        self.stack.clear();
        self.captures = None;
        self.time = None;
        self.ip = 0;

        let program = Arc::clone(&self.program);
        while self.ip < program.instrs.len() {
            let instr = program.instrs[self.ip];
            self.ip += 1;
            if !self.execute(&program, instr, line)? {
                break;
            }
        }
        Ok(())
    }

    /// 명령어 하나를 실행합니다. `Ok(false)`는 정상 종료를 뜻합니다.
    fn execute(&mut self, program: &Program, instr: Instr, line: &str) -> Result<bool, VmError> {
        match instr.opcode {
            Opcode::Jmp => {
                self.ip = self.jump_target(program, instr.operand)?;
            }
            Opcode::Jnm => {
                let matched = self.pop_bool()?;
                if !matched {
                    self.ip = self.jump_target(program, instr.operand)?;
                }
            }
            Opcode::Jm => {
                let matched = self.pop_bool()?;
                if matched {
                    self.ip = self.jump_target(program, instr.operand)?;
                }
            }
            Opcode::Stop | Opcode::Ret => return Ok(false),

            Opcode::Match => {
                let re = program
                    .regexes
                    .get(usize::try_from(instr.operand).unwrap_or(usize::MAX))
                    .ok_or(VmError::BadOperand {
                        operand: instr.operand,
                        what: "regex pool",
                    })?;
                // 스택 최상단이 문자열이면 그 문자열을, 아니면 입력 라인을 대상
                let subject = if matches!(self.stack.last(), Some(Value::Str(_))) {
                    self.pop_str()?
                } else {
                    line.to_owned()
                };
                match re.captures(&subject) {
                    Some(caps) => {
                        self.captures = Some(
                            caps.iter()
                                .map(|g| g.map(|m| m.as_str().to_owned()))
                                .collect(),
                        );
                        self.stack.push(Value::Bool(true));
                    }
                    None => {
                        // no-match는 에러가 아님
                        self.captures = None;
                        self.stack.push(Value::Bool(false));
                    }
                }
            }

            Opcode::Push => {
                let s = self.string_const(program, instr.operand)?;
                self.stack.push(Value::Str(s));
            }
            Opcode::Dup => {
                let top = self.stack.last().cloned().ok_or(VmError::StackUnderflow {
                    ip: self.ip - 1,
                })?;
                self.stack.push(top);
            }
            Opcode::Drop => {
                self.pop()?;
            }
            Opcode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow { ip: self.ip - 1 });
                }
                self.stack.swap(len - 1, len - 2);
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(binary_op(instr.opcode, a, b)?);
            }
            Opcode::Neg => {
                let v = match self.pop()? {
                    Value::Int(i) => Value::Int(-i),
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(VmError::TypeMismatch {
                            expected: "number",
                            got: other.type_name(),
                        });
                    }
                };
                self.stack.push(v);
            }
            Opcode::Not => {
                let v = match self.pop()? {
                    Value::Bool(b) => Value::Bool(!b),
                    Value::Int(i) => Value::Int(!i),
                    other => {
                        return Err(VmError::TypeMismatch {
                            expected: "bool or int",
                            got: other.type_name(),
                        });
                    }
                };
                self.stack.push(v);
            }

            Opcode::S2i => {
                let s = self.pop_str()?;
                let i = s.parse::<i64>().map_err(|_| VmError::BadConversion {
                    input: s,
                    target: "int",
                })?;
                self.stack.push(Value::Int(i));
            }
            Opcode::S2f => {
                let s = self.pop_str()?;
                let f = s.parse::<f64>().map_err(|_| VmError::BadConversion {
                    input: s,
                    target: "float",
                })?;
                self.stack.push(Value::Float(f));
            }
            Opcode::I2f => {
                let i = self.pop_int()?;
                self.stack.push(Value::Float(i as f64));
            }
            Opcode::I2s => {
                let i = self.pop_int()?;
                self.stack.push(Value::Str(i.to_string()));
            }
            Opcode::F2s => {
                let f = self.pop_float()?;
                self.stack.push(Value::Str(f.to_string()));
            }

            Opcode::Strptime => {
                let format = self.string_const(program, instr.operand)?;
                let input = self.pop_str()?;
                let nanos = parse_timestamp(&input, &format)?;
                self.stack.push(Value::Int(nanos));
            }
            Opcode::Settime => {
                let nanos = self.pop_int()?;
                self.time = Some(Utc.timestamp_nanos(nanos));
            }

            Opcode::Mload => {
                let metric = program
                    .metrics
                    .get(usize::try_from(instr.operand).unwrap_or(usize::MAX))
                    .ok_or(VmError::BadOperand {
                        operand: instr.operand,
                        what: "metric table",
                    })?;
                self.stack.push(Value::Metric(Arc::clone(metric)));
            }
            Opcode::Dload => {
                let arity = usize::try_from(instr.operand).map_err(|_| VmError::BadOperand {
                    operand: instr.operand,
                    what: "label arity",
                })?;
                let mut labels = Vec::with_capacity(arity);
                for _ in 0..arity {
                    labels.push(self.pop_label()?);
                }
                labels.reverse();
                let metric = self.pop_metric()?;
                let datum = metric.get_datum(&labels)?;
                self.stack.push(Value::Datum(datum));
            }
            Opcode::Iadd => {
                let amount = self.int_amount(instr.operand)?;
                let datum = self.pop_datum()?;
                datum.inc_by(amount, self.now())?;
            }
            Opcode::Iset => {
                let amount = self.int_amount(instr.operand)?;
                let datum = self.pop_datum()?;
                datum.set_int(amount, self.now())?;
            }
            Opcode::Fadd => {
                let amount = self.float_amount(instr.operand)?;
                let datum = self.pop_datum()?;
                datum.inc_by_float(amount, self.now())?;
            }
            Opcode::Fset => {
                let amount = self.float_amount(instr.operand)?;
                let datum = self.pop_datum()?;
                datum.set_float(amount, self.now())?;
            }
            Opcode::Hobs => {
                let x = self.float_amount(instr.operand)?;
                let datum = self.pop_datum()?;
                datum.observe(x, self.now())?;
            }
            Opcode::Setstr => {
                let text = if matches!(self.stack.last(), Some(Value::Str(_))) {
                    self.pop_str()?
                } else {
                    self.string_const(program, instr.operand)?
                };
                let datum = self.pop_datum()?;
                datum.set_text(text, self.now())?;
            }

            Opcode::Capref => {
                let n = usize::try_from(instr.operand).map_err(|_| VmError::BadOperand {
                    operand: instr.operand,
                    what: "capture group",
                })?;
                let group = self
                    .captures
                    .as_ref()
                    .and_then(|caps| caps.get(n).cloned().flatten())
                    .ok_or(VmError::MissingCapture(n))?;
                self.stack.push(Value::Str(group));
            }
        }
        Ok(true)
    }

    // ─── 스택 헬퍼 ──────────────────────────────────────────────────

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow {
            ip: self.ip.saturating_sub(1),
        })
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(VmError::TypeMismatch {
                expected: "bool",
                got: other.type_name(),
            }),
        }
    }

    fn pop_int(&mut self) -> Result<i64, VmError> {
        match self.pop()? {
            Value::Int(i) => Ok(i),
            other => Err(VmError::TypeMismatch {
                expected: "int",
                got: other.type_name(),
            }),
        }
    }

    fn pop_float(&mut self) -> Result<f64, VmError> {
        match self.pop()? {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(VmError::TypeMismatch {
                expected: "float",
                got: other.type_name(),
            }),
        }
    }

    fn pop_str(&mut self) -> Result<String, VmError> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(VmError::TypeMismatch {
                expected: "str",
                got: other.type_name(),
            }),
        }
    }

    /// 레이블 값으로 쓸 수 있는 값을 팝합니다. 숫자는 문자열화합니다.
    fn pop_label(&mut self) -> Result<String, VmError> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            other => Err(VmError::TypeMismatch {
                expected: "str, int or float",
                got: other.type_name(),
            }),
        }
    }

    fn pop_metric(&mut self) -> Result<Arc<logmet_metrics::Metric>, VmError> {
        match self.pop()? {
            Value::Metric(m) => Ok(m),
            other => Err(VmError::TypeMismatch {
                expected: "metric",
                got: other.type_name(),
            }),
        }
    }

    fn pop_datum(&mut self) -> Result<Arc<logmet_metrics::Datum>, VmError> {
        match self.pop()? {
            Value::Datum(d) => Ok(d),
            other => Err(VmError::TypeMismatch {
                expected: "datum",
                got: other.type_name(),
            }),
        }
    }

    /// 스택 최상단이 숫자면 팝하고, 아니면 피연산자를 즉치값으로 씁니다.
    fn int_amount(&mut self, operand: i32) -> Result<i64, VmError> {
        match self.stack.last() {
            Some(Value::Int(_)) => self.pop_int(),
            _ => Ok(i64::from(operand)),
        }
    }

    fn float_amount(&mut self, operand: i32) -> Result<f64, VmError> {
        match self.stack.last() {
            Some(Value::Float(_) | Value::Int(_)) => self.pop_float(),
            _ => Ok(f64::from(operand)),
        }
    }

    fn string_const(&self, program: &Program, operand: i32) -> Result<String, VmError> {
        program
            .strings
            .get(usize::try_from(operand).unwrap_or(usize::MAX))
            .cloned()
            .ok_or(VmError::BadOperand {
                operand,
                what: "string pool",
            })
    }

    /// 점프 대상을 검증합니다. 배열 끝(= len)으로의 점프는 종료를 뜻합니다.
    fn jump_target(&self, program: &Program, operand: i32) -> Result<usize, VmError> {
        let target = usize::try_from(operand).map_err(|_| VmError::BadOperand {
            operand,
            what: "jump target",
        })?;
        if target > program.instrs.len() {
            return Err(VmError::BadOperand {
                operand,
                what: "jump target",
            });
        }
        Ok(target)
    }

    fn now(&self) -> DateTime<Utc> {
        self.time.unwrap_or_else(Utc::now)
    }
}

/// 이항 연산을 수행합니다. 피연산자에 Float이 섞이면 Float 산술,
/// 비트 연산은 Int 전용, 논리 연산은 Bool에도 적용됩니다.
fn binary_op(op: Opcode, a: Value, b: Value) -> Result<Value, VmError> {
    use Opcode::*;

    match (op, a, b) {
        // Bool 논리 연산
        (And, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
        (Or, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
        (Xor, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a ^ b)),

        // Int 산술/비트 연산
        (op, Value::Int(a), Value::Int(b)) => int_op(op, a, b),

        // Float이 섞인 산술 연산
        (op, a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
            let a = as_f64(&a);
            let b = as_f64(&b);
            float_op(op, a, b)
        }

        (_, a, b) => Err(VmError::TypeMismatch {
            expected: "numeric operands",
            got: if matches!(a, Value::Int(_) | Value::Float(_)) {
                b.type_name()
            } else {
                a.type_name()
            },
        }),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => unreachable!("checked by caller"),
    }
}

fn int_op(op: Opcode, a: i64, b: i64) -> Result<Value, VmError> {
    use Opcode::*;
    let v = match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        Div => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        Mod => {
            if b == 0 {
                return Err(VmError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        Pow => {
            let exp = u32::try_from(b).map_err(|_| VmError::BadConversion {
                input: b.to_string(),
                target: "exponent",
            })?;
            a.wrapping_pow(exp)
        }
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Shl => a.wrapping_shl(b as u32),
        Shr => a.wrapping_shr(b as u32),
        _ => unreachable!("not a binary int op"),
    };
    Ok(Value::Int(v))
}

fn float_op(op: Opcode, a: f64, b: f64) -> Result<Value, VmError> {
    use Opcode::*;
    let v = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => {
            if b == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            a / b
        }
        Mod => {
            if b == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            a % b
        }
        Pow => a.powf(b),
        // 비트 연산은 정수 전용
        _ => {
            return Err(VmError::TypeMismatch {
                expected: "int",
                got: "float",
            });
        }
    };
    Ok(Value::Float(v))
}

/// 시각 문자열을 epoch 나노초로 파싱합니다.
///
/// 타임존이 포함된 형식을 먼저 시도하고, 없으면 UTC로 간주합니다.
fn parse_timestamp(input: &str, format: &str) -> Result<i64, VmError> {
    let strptime_err = || VmError::Strptime {
        input: input.to_owned(),
        format: format.to_owned(),
    };

    let dt = if let Ok(dt) = DateTime::parse_from_str(input, format) {
        dt.with_timezone(&Utc)
    } else if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(input, format) {
        Utc.from_utc_datetime(&naive)
    } else {
        return Err(strptime_err());
    };
    dt.timestamp_nanos_opt().ok_or_else(strptime_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramBuilder;
    use logmet_metrics::{DatumValue, Kind, MetricStore};

    fn run_program(b: ProgramBuilder, line: &str) -> Result<Vm, VmError> {
        let mut vm = Vm::new(Arc::new(b.build()));
        vm.run(line)?;
        Ok(vm)
    }

    #[test]
    fn empty_program_runs_to_end() {
        let b = ProgramBuilder::new("empty");
        run_program(b, "anything").unwrap();
    }

    #[test]
    fn match_and_capref() {
        let store = MetricStore::new();
        let m = store
            .new_metric("p", "last_code", Kind::Text, &[])
            .unwrap();

        let mut b = ProgramBuilder::new("p");
        let re = b.regex(r"code=(\d+)").unwrap();
        let mi = b.metric(Arc::clone(&m));
        let end = 6;
        b.instr(Opcode::Match, re as i32);
        b.instr(Opcode::Jnm, end);
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Capref, 1);
        b.instr(Opcode::Setstr, 0);
        b.instr(Opcode::Stop, 0);

        run_program(b, "request code=503 done").unwrap();
        let datum = m.find_label_value::<&str>(&[]).unwrap();
        assert_eq!(datum.value(), DatumValue::Text("503".to_owned()));
    }

    #[test]
    fn no_match_is_not_an_error() {
        let mut b = ProgramBuilder::new("p");
        let re = b.regex("^ERROR").unwrap();
        b.instr(Opcode::Match, re as i32);
        b.instr(Opcode::Jnm, 3);
        b.instr(Opcode::Stop, 0);

        run_program(b, "ok line").unwrap();
    }

    #[test]
    fn missing_capture_is_runtime_error() {
        let mut b = ProgramBuilder::new("p");
        b.instr(Opcode::Capref, 1);
        let err = run_program(b, "no match happened").unwrap_err();
        assert!(matches!(err, VmError::MissingCapture(1)));
    }

    #[test]
    fn division_by_zero_is_runtime_error() {
        let mut b = ProgramBuilder::new("p");
        let zero = b.string("0");
        let ten = b.string("10");
        b.instr(Opcode::Push, ten as i32);
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Push, zero as i32);
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Div, 0);
        let err = run_program(b, "").unwrap_err();
        assert!(matches!(err, VmError::DivisionByZero));
    }

    #[test]
    fn arithmetic_on_ints() {
        // (7 + 3) * 2 = 20을 계산하여 게이지에 저장
        let store = MetricStore::new();
        let m = store.new_metric("p", "g", Kind::Gauge, &[]).unwrap();

        let mut b = ProgramBuilder::new("p");
        let seven = b.string("7");
        let three = b.string("3");
        let two = b.string("2");
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Push, seven as i32);
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Push, three as i32);
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Add, 0);
        b.instr(Opcode::Push, two as i32);
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Mul, 0);
        b.instr(Opcode::Iset, 0);
        b.instr(Opcode::Stop, 0);

        run_program(b, "").unwrap();
        let datum = m.find_label_value::<&str>(&[]).unwrap();
        assert_eq!(datum.value(), DatumValue::Int(20));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let store = MetricStore::new();
        let m = store.new_metric("p", "g", Kind::Gauge, &[]).unwrap();
        // Float datum이 필요하므로 직접 만든 뒤 fset으로 덮어씀
        let mut b = ProgramBuilder::new("p");
        let half = b.string("0.5");
        let two = b.string("2");
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Push, half as i32);
        b.instr(Opcode::S2f, 0);
        b.instr(Opcode::Push, two as i32);
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Mul, 0);
        b.instr(Opcode::Iset, 0);
        // Int datum에 Float을 iset -> 타입 불일치 런타임 에러
        let err = run_program(b, "").unwrap_err();
        assert!(matches!(err, VmError::TypeMismatch { .. }));
    }

    #[test]
    fn dup_drop_swap() {
        let mut b = ProgramBuilder::new("p");
        let one = b.string("1");
        let two = b.string("2");
        b.instr(Opcode::Push, one as i32); // ["1"]
        b.instr(Opcode::Push, two as i32); // ["1" "2"]
        b.instr(Opcode::Swap, 0); //          ["2" "1"]
        b.instr(Opcode::Dup, 0); //           ["2" "1" "1"]
        b.instr(Opcode::Drop, 0); //          ["2" "1"]
        b.instr(Opcode::S2i, 0);
        b.instr(Opcode::Stop, 0);
        run_program(b, "").unwrap();
    }

    #[test]
    fn strptime_pushes_epoch_nanos() {
        let store = MetricStore::new();
        let m = store.new_metric("p", "t", Kind::Timer, &[]).unwrap();

        let mut b = ProgramBuilder::new("p");
        let fmt = b.string("%Y-%m-%d %H:%M:%S");
        let ts = b.string("2026-01-15 12:00:00");
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Push, ts as i32);
        b.instr(Opcode::Strptime, fmt as i32);
        b.instr(Opcode::Iset, 0);
        b.instr(Opcode::Stop, 0);

        run_program(b, "").unwrap();
        let datum = m.find_label_value::<&str>(&[]).unwrap();
        let expected = Utc
            .with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap();
        assert_eq!(datum.value(), DatumValue::Int(expected));
    }

    #[test]
    fn strptime_failure_is_runtime_error() {
        let mut b = ProgramBuilder::new("p");
        let fmt = b.string("%Y-%m-%d");
        let bad = b.string("not a date");
        b.instr(Opcode::Push, bad as i32);
        b.instr(Opcode::Strptime, fmt as i32);
        let err = run_program(b, "").unwrap_err();
        assert!(matches!(err, VmError::Strptime { .. }));
    }

    #[test]
    fn settime_stamps_datum_updates() {
        let store = MetricStore::new();
        let m = store.new_metric("p", "c", Kind::Counter, &[]).unwrap();

        let mut b = ProgramBuilder::new("p");
        let fmt = b.string("%Y-%m-%d %H:%M:%S");
        let ts = b.string("2026-01-15 12:00:00");
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Push, ts as i32);
        b.instr(Opcode::Strptime, fmt as i32);
        b.instr(Opcode::Settime, 0);
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Iadd, 1);
        b.instr(Opcode::Stop, 0);

        run_program(b, "").unwrap();
        let datum = m.find_label_value::<&str>(&[]).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(datum.time(), expected);
    }

    #[test]
    fn dload_with_labels_from_captures() {
        let store = MetricStore::new();
        let m = store
            .new_metric("p", "hits", Kind::Counter, &["code"])
            .unwrap();

        let mut b = ProgramBuilder::new("p");
        let re = b.regex(r"code=(\d+)").unwrap();
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Match, re as i32);
        b.instr(Opcode::Jnm, 7);
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Capref, 1);
        b.instr(Opcode::Dload, 1);
        b.instr(Opcode::Iadd, 1);
        b.instr(Opcode::Stop, 0);

        let program = Arc::new(b.build());
        let mut vm = Vm::new(Arc::clone(&program));
        vm.run("GET code=200").unwrap();
        vm.run("GET code=404").unwrap();
        vm.run("GET code=200").unwrap();

        assert_eq!(
            m.find_label_value(&["200"]).unwrap().value(),
            DatumValue::Int(2)
        );
        assert_eq!(
            m.find_label_value(&["404"]).unwrap().value(),
            DatumValue::Int(1)
        );
    }

    #[test]
    fn label_arity_mismatch_is_runtime_error() {
        let store = MetricStore::new();
        let m = store
            .new_metric("p", "hits", Kind::Counter, &["a", "b"])
            .unwrap();

        let mut b = ProgramBuilder::new("p");
        let one = b.string("x");
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Push, one as i32);
        b.instr(Opcode::Dload, 1); // 선언은 2개, 전달은 1개
        let err = run_program(b, "").unwrap_err();
        assert!(matches!(
            err,
            VmError::Metrics(logmet_metrics::MetricsError::WrongLabelArity { .. })
        ));
    }

    #[test]
    fn state_is_reset_between_lines() {
        let mut b = ProgramBuilder::new("p");
        let re = b.regex("(E)RROR").unwrap();
        b.instr(Opcode::Match, re as i32);
        b.instr(Opcode::Drop, 0);
        b.instr(Opcode::Stop, 0);

        let program = Arc::new(b.build());
        let mut vm = Vm::new(Arc::clone(&program));
        vm.run("ERROR x").unwrap();
        // 두 번째 라인에서는 이전 캡처가 남아있지 않아야 함
        vm.run("ok").unwrap();

        let mut b2 = ProgramBuilder::new("p2");
        b2.instr(Opcode::Capref, 1);
        let mut vm2 = Vm::new(Arc::new(b2.build()));
        assert!(vm2.run("anything").is_err());
    }

    #[test]
    fn determinism_same_line_same_deltas() {
        let store = MetricStore::new();
        let m = store.new_metric("p", "errs", Kind::Counter, &[]).unwrap();

        let mut b = ProgramBuilder::new("p");
        let re = b.regex("^ERROR").unwrap();
        let mi = b.metric(Arc::clone(&m));
        b.instr(Opcode::Match, re as i32);
        b.instr(Opcode::Jnm, 5);
        b.instr(Opcode::Mload, mi as i32);
        b.instr(Opcode::Dload, 0);
        b.instr(Opcode::Iadd, 1);
        b.instr(Opcode::Stop, 0);

        let program = Arc::new(b.build());
        let mut vm = Vm::new(Arc::clone(&program));

        vm.run("ERROR one").unwrap();
        let after_first = m.find_label_value::<&str>(&[]).unwrap().value();
        vm.run("ERROR one").unwrap();
        let after_second = m.find_label_value::<&str>(&[]).unwrap().value();

        // 같은 라인은 같은 델타 (+1)를 만든다
        assert_eq!(after_first, DatumValue::Int(1));
        assert_eq!(after_second, DatumValue::Int(2));
    }

    #[test]
    fn jump_past_end_is_bad_operand() {
        let mut b = ProgramBuilder::new("p");
        b.instr(Opcode::Jmp, 99);
        let err = run_program(b, "").unwrap_err();
        assert!(matches!(err, VmError::BadOperand { .. }));
    }

    #[test]
    fn jump_to_end_terminates_cleanly() {
        let mut b = ProgramBuilder::new("p");
        b.instr(Opcode::Jmp, 1);
        run_program(b, "").unwrap();
    }
}
