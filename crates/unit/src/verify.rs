//! Structural verification of units.
//!
//! Every unit passes through [`verify`] on decode and on encode. The checks
//! cover what the interpreter relies on: targets in range, slots allocated,
//! bodies that cannot run off their end, return kinds that match signatures
//! and guard blocks that cannot leave the method.

use std::collections::HashSet;

use crate::types::{Instr, Method, Unit};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("unit name is empty")]
    EmptyUnitName,

    #[error("method {method}: {reason}")]
    Method { method: String, reason: String },

    #[error("method {method}: {reason} at instruction {at}")]
    Instruction {
        method: String,
        at: String,
        reason: String,
    },
}

/// Check a whole unit.
pub fn verify(unit: &Unit) -> Result<(), VerifyError> {
    if unit.name.trim().is_empty() {
        return Err(VerifyError::EmptyUnitName);
    }
    let mut seen = HashSet::new();
    for method in &unit.methods {
        if !seen.insert((method.name.as_str(), method.params.as_slice())) {
            return Err(method_error(method, "duplicate signature"));
        }
        verify_method(method)?;
    }
    Ok(())
}

fn method_error(method: &Method, reason: &str) -> VerifyError {
    VerifyError::Method {
        method: method.signature(),
        reason: reason.to_string(),
    }
}

fn verify_method(method: &Method) -> Result<(), VerifyError> {
    if method.name.is_empty() {
        return Err(method_error(method, "empty method name"));
    }
    if method.is_constructor() && method.returns.is_some() {
        return Err(method_error(method, "constructor declares a return type"));
    }
    if method.params.len() > method.locals as usize {
        return Err(method_error(method, "parameters exceed local slots"));
    }
    match method.body.last() {
        None => return Err(method_error(method, "empty body")),
        Some(last) if !last.is_terminal() => {
            return Err(method_error(method, "body falls through its last instruction"))
        }
        Some(_) => {}
    }

    let checker = BlockChecker { method };
    checker.check(&method.body, "", BlockKind::Body)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Body,
    Guard,
}

struct BlockChecker<'a> {
    method: &'a Method,
}

impl BlockChecker<'_> {
    fn fail(&self, path: &str, index: usize, reason: impl Into<String>) -> VerifyError {
        VerifyError::Instruction {
            method: self.method.signature(),
            at: format!("{}{}", path, index),
            reason: reason.into(),
        }
    }

    fn check(&self, block: &[Instr], path: &str, kind: BlockKind) -> Result<(), VerifyError> {
        // A guard block may jump to its own end to finish early.
        let max_target = match kind {
            BlockKind::Body => block.len().saturating_sub(1),
            BlockKind::Guard => block.len(),
        };

        for (i, instr) in block.iter().enumerate() {
            match instr {
                Instr::Jump(t) | Instr::JumpUnless(t) if *t as usize > max_target => {
                    return Err(self.fail(path, i, format!("jump target {} out of range", t)));
                }
                Instr::Load(slot) | Instr::Store(slot) if *slot >= self.method.locals => {
                    return Err(self.fail(path, i, format!("local slot {} not allocated", slot)));
                }
                Instr::Return | Instr::ReturnVoid if kind == BlockKind::Guard => {
                    return Err(self.fail(path, i, "return inside guard"));
                }
                Instr::Return if self.method.returns.is_none() => {
                    return Err(self.fail(path, i, "value return in void method"));
                }
                Instr::ReturnVoid if self.method.returns.is_some() => {
                    return Err(self.fail(path, i, "void return in value method"));
                }
                Instr::Caught if kind == BlockKind::Body => {
                    return Err(self.fail(path, i, "caught outside guard handler"));
                }
                Instr::Guard { marker, body, handler } => {
                    if kind == BlockKind::Guard && marker.is_some() {
                        return Err(self.fail(path, i, "marked guard nested in guard"));
                    }
                    self.check(body, &format!("{}{}.body.", path, i), BlockKind::Guard)?;
                    self.check(handler, &format!("{}{}.handler.", path, i), BlockKind::Guard)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Value, ValueType};

    fn unit_with(method: Method) -> Unit {
        Unit::new("demo.Foo").with_method(method)
    }

    #[test]
    fn accepts_well_formed_method() {
        let m = Method::new(
            "abs",
            vec![ValueType::Int],
            Some(ValueType::Int),
            vec![
                Instr::Load(0),
                Instr::Push(Value::Int(0)),
                Instr::Lt,
                Instr::JumpUnless(7),
                Instr::Push(Value::Int(0)),
                Instr::Load(0),
                Instr::Sub,
                Instr::Load(0),
                Instr::Return,
            ],
        );
        // jump_unless 7 skips the negation; the stack shape is not our concern
        assert!(verify(&unit_with(m)).is_ok());
    }

    #[test]
    fn rejects_fall_through() {
        let m = Method::new("f", vec![], None, vec![Instr::Push(Value::Int(1)), Instr::Pop]);
        let err = verify(&unit_with(m)).unwrap_err();
        assert!(err.to_string().contains("falls through"));
    }

    #[test]
    fn rejects_jump_past_body() {
        let m = Method::new("f", vec![], None, vec![Instr::Jump(1)]);
        assert!(matches!(verify(&unit_with(m)), Err(VerifyError::Instruction { .. })));
    }

    #[test]
    fn guard_may_jump_to_its_end() {
        let guard = Instr::Guard {
            marker: Some(1),
            body: vec![Instr::Jump(1)],
            handler: vec![],
        };
        let m = Method::new("f", vec![], None, vec![guard, Instr::ReturnVoid]);
        assert!(verify(&unit_with(m)).is_ok());
    }

    #[test]
    fn rejects_return_inside_guard() {
        let guard = Instr::Guard {
            marker: None,
            body: vec![Instr::ReturnVoid],
            handler: vec![],
        };
        let m = Method::new("f", vec![], None, vec![guard, Instr::ReturnVoid]);
        let err = verify(&unit_with(m)).unwrap_err();
        assert!(err.to_string().contains("return inside guard"));
        assert!(err.to_string().contains("0.body.0"));
    }

    #[test]
    fn rejects_mismatched_return_kind() {
        let m = Method::new("f", vec![], Some(ValueType::Int), vec![Instr::ReturnVoid]);
        assert!(verify(&unit_with(m)).is_err());
    }

    #[test]
    fn rejects_unallocated_local() {
        let m = Method::new("f", vec![ValueType::Int], None, vec![Instr::Load(1), Instr::ReturnVoid]);
        assert!(verify(&unit_with(m)).is_err());
    }

    #[test]
    fn rejects_duplicate_signature_but_allows_overloads() {
        let a = Method::new("f", vec![], None, vec![Instr::ReturnVoid]);
        let b = Method::new("f", vec![ValueType::Int], None, vec![Instr::ReturnVoid]);
        let unit = Unit::new("demo.Foo").with_method(a.clone()).with_method(b);
        assert!(verify(&unit).is_ok());
        let unit = unit.with_method(a);
        assert!(verify(&unit).is_err());
    }
}
