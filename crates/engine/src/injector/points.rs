//! Where placement code goes in a method body.

use graft_unit::{splice, Instr, Method};

use crate::error::InjectError;

/// Before the first instruction. Jumps to index 0 (loop heads) keep landing
/// on the original code, so the placement runs once per call.
pub(crate) fn at_entry(method: &mut Method, code: Vec<Instr>) {
    splice(&mut method.body, 0, code, false);
}

/// Before every return. Sites are handled last to first so earlier indices
/// stay valid; jumps that targeted a return now run the placement first.
/// Returns the number of sites.
pub(crate) fn at_exits<F>(method: &mut Method, mut code: F) -> usize
where
    F: FnMut() -> Vec<Instr>,
{
    let sites: Vec<usize> = method
        .body
        .iter()
        .enumerate()
        .filter(|(_, instr)| instr.is_return())
        .map(|(i, _)| i)
        .collect();
    for &pos in sites.iter().rev() {
        splice(&mut method.body, pos, code(), true);
    }
    sites.len()
}

/// Before the instruction at `offset`; jumps to it run the placement first.
pub(crate) fn at_offset(method: &mut Method, offset: u32, code: Vec<Instr>) -> Result<(), InjectError> {
    let len = method.body.len();
    if offset as usize >= len {
        return Err(InjectError::OffsetOutOfRange {
            method: method.signature(),
            offset,
            len,
        });
    }
    splice(&mut method.body, offset as usize, code, true);
    Ok(())
}
