//! Stack-machine interpreter for unit code.

use std::sync::Arc;

use graft_unit::{Instr, Method, Unit, Value};

use crate::error::ExecError;
use crate::runtime::VirtualRuntime;

/// Deepest call chain an interpreter allows.
pub const MAX_DEPTH: usize = 256;

enum Flow {
    /// Control left the block by running past its last instruction.
    Done,
    Return(Option<Value>),
}

/// One thread of execution: the call stack and the runtime it runs against.
pub(crate) struct Interp<'rt> {
    rt: &'rt VirtualRuntime,
    frames: Vec<String>,
}

/// Locals and operand stack of the method being run.
struct Frame {
    label: String,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn pop(&mut self) -> Result<Value, ExecError> {
        self.stack
            .pop()
            .ok_or_else(|| ExecError::StackUnderflow(self.label.clone()))
    }

    fn peek(&self) -> Result<&Value, ExecError> {
        self.stack
            .last()
            .ok_or_else(|| ExecError::StackUnderflow(self.label.clone()))
    }
}

impl<'rt> Interp<'rt> {
    pub(crate) fn new(rt: &'rt VirtualRuntime) -> Self {
        Self {
            rt,
            frames: Vec::new(),
        }
    }

    /// Call stack, innermost first.
    fn call_stack(&self) -> Vec<String> {
        self.frames.iter().rev().cloned().collect()
    }

    pub(crate) fn call(&mut self, unit: &str, method: &str, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        let loaded: Arc<Unit> = self
            .rt
            .unit(unit)
            .ok_or_else(|| ExecError::NoSuchUnit(unit.to_string()))?;
        let target = loaded
            .find(method, args.len())
            .ok_or_else(|| ExecError::NoSuchMethod {
                unit: unit.to_string(),
                method: method.to_string(),
                argc: args.len(),
            })?;
        self.invoke(&loaded.name, target, args)
    }

    fn invoke(&mut self, unit: &str, method: &Method, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(ExecError::StackOverflow(MAX_DEPTH));
        }
        let label = format!("{}.{}", unit, method.name);
        let mut locals = vec![Value::Null; method.locals as usize];
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = arg;
        }
        let mut frame = Frame {
            label: label.clone(),
            locals,
            stack: Vec::new(),
        };

        self.frames.push(label.clone());
        let result = self.run(&method.body, &mut frame, None);
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Done => Err(ExecError::FellThrough(label)),
        }
    }

    fn run(&mut self, code: &[Instr], frame: &mut Frame, caught: Option<&str>) -> Result<Flow, ExecError> {
        let mut pc = 0;
        while let Some(instr) = code.get(pc) {
            pc += 1;
            match instr {
                Instr::Push(v) => frame.stack.push(v.clone()),
                Instr::Load(slot) => {
                    let v = frame.locals[*slot as usize].clone();
                    frame.stack.push(v);
                }
                Instr::Store(slot) => frame.locals[*slot as usize] = frame.pop()?,
                Instr::Dup => {
                    let v = frame.peek()?.clone();
                    frame.stack.push(v);
                }
                Instr::Pop => {
                    frame.pop()?;
                }
                Instr::Add | Instr::Sub | Instr::Mul | Instr::Div => {
                    let r = frame.pop()?;
                    let l = frame.pop()?;
                    frame.stack.push(arith(instr, l, r)?);
                }
                Instr::Concat => {
                    let r = frame.pop()?;
                    let l = frame.pop()?;
                    frame.stack.push(Value::Str(format!("{}{}", l, r)));
                }
                Instr::Lt => {
                    let r = frame.pop()?;
                    let l = frame.pop()?;
                    frame.stack.push(Value::Bool(less_than(&l, &r)?));
                }
                Instr::Eq => {
                    let r = frame.pop()?;
                    let l = frame.pop()?;
                    frame.stack.push(Value::Bool(l == r));
                }
                Instr::IsNull => {
                    let v = frame.pop()?;
                    frame.stack.push(Value::Bool(v.is_null()));
                }
                Instr::Jump(t) => pc = *t as usize,
                Instr::JumpUnless(t) => match frame.pop()? {
                    Value::Bool(true) => {}
                    Value::Bool(false) => pc = *t as usize,
                    other => return Err(ExecError::Type(format!("jump_unless on {:?}", other))),
                },
                Instr::Invoke { unit, method, argc } => {
                    let split = frame
                        .stack
                        .len()
                        .checked_sub(*argc as usize)
                        .ok_or_else(|| ExecError::StackUnderflow(frame.label.clone()))?;
                    let args = frame.stack.split_off(split);
                    if let Some(v) = self.call(unit, method, args)? {
                        frame.stack.push(v);
                    }
                }
                Instr::Print => {
                    let v = frame.pop()?;
                    self.rt.print(&v.to_string());
                }
                Instr::Clock => frame.stack.push(Value::Int(self.rt.clock_nanos())),
                Instr::Trace => {
                    let v = frame.pop()?;
                    self.rt.sink().trace(&v.to_string());
                }
                Instr::StackTrace(header) => self.rt.sink().stack(header, &self.call_stack()),
                Instr::HeapDump => self
                    .rt
                    .heap_dump(self.call_stack())
                    .map_err(|e| ExecError::HeapDump(e.to_string()))?,
                Instr::ReportError => {
                    let v = frame.pop()?;
                    self.rt.sink().error(&v.to_string());
                }
                Instr::Caught => {
                    let msg = caught.ok_or(ExecError::NothingCaught)?;
                    frame.stack.push(Value::Str(msg.to_string()));
                }
                Instr::Throw(msg) => return Err(ExecError::Thrown(msg.clone())),
                Instr::Guard { body, handler, .. } => {
                    // guard code shares the locals but sees an empty operand stack
                    let outer = std::mem::take(&mut frame.stack);
                    let result = self.guarded(body, handler, frame, caught);
                    frame.stack = outer;
                    if let Flow::Return(v) = result? {
                        return Ok(Flow::Return(v));
                    }
                }
                Instr::Return => return Ok(Flow::Return(Some(frame.pop()?))),
                Instr::ReturnVoid => return Ok(Flow::Return(None)),
            }
        }
        Ok(Flow::Done)
    }

    /// Run a guard body, then its handler if the body failed. Both run on the
    /// frame's current operand stack, which the caller swaps out beforehand.
    fn guarded(
        &mut self,
        body: &[Instr],
        handler: &[Instr],
        frame: &mut Frame,
        caught: Option<&str>,
    ) -> Result<Flow, ExecError> {
        match self.run(body, frame, caught) {
            Err(e) if e.is_catchable() => {
                frame.stack.clear();
                let msg = e.to_string();
                self.run(handler, frame, Some(msg.as_str()))
            }
            other => other,
        }
    }
}

fn arith(op: &Instr, l: Value, r: Value) -> Result<Value, ExecError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let v = match op {
                Instr::Add => a.checked_add(b),
                Instr::Sub => a.checked_sub(b),
                Instr::Mul => a.checked_mul(b),
                _ if b == 0 => return Err(ExecError::DivideByZero),
                _ => a.checked_div(b),
            };
            v.map(Value::Int).ok_or(ExecError::Overflow)
        }
        (l, r) => {
            let (a, b) = (as_float(&l)?, as_float(&r)?);
            Ok(Value::Float(match op {
                Instr::Add => a + b,
                Instr::Sub => a - b,
                Instr::Mul => a * b,
                _ => a / b,
            }))
        }
    }
}

fn as_float(v: &Value) -> Result<f64, ExecError> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(ExecError::Type(format!("expected a number, got {:?}", other))),
    }
}

fn less_than(l: &Value, r: &Value) -> Result<bool, ExecError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a < b),
        (Value::Str(a), Value::Str(b)) => Ok(a < b),
        _ => Ok(as_float(l)? < as_float(r)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_is_checked() {
        assert_eq!(arith(&Instr::Div, Value::Int(7), Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(arith(&Instr::Div, Value::Int(1), Value::Int(0)), Err(ExecError::DivideByZero));
        assert_eq!(arith(&Instr::Add, Value::Int(i64::MAX), Value::Int(1)), Err(ExecError::Overflow));
        assert_eq!(arith(&Instr::Mul, Value::Int(2), Value::Float(1.5)), Ok(Value::Float(3.0)));
        assert!(matches!(
            arith(&Instr::Sub, Value::Null, Value::Int(1)),
            Err(ExecError::Type(_))
        ));
    }

    #[test]
    fn comparisons() {
        assert_eq!(less_than(&Value::Int(1), &Value::Int(2)), Ok(true));
        assert_eq!(less_than(&Value::from("b"), &Value::from("a")), Ok(false));
        assert!(less_than(&Value::Null, &Value::Int(2)).is_err());
    }
}
