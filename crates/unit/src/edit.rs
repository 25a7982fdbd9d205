//! Owned, single-use editing handle over a parsed unit.

use crate::codec::{self, CodecError};
use crate::types::{Instr, Method, Unit};

/// Parsed, mutable form of one unit.
///
/// The editor owns its unit for the duration of a rewrite. [`UnitEditor::finish`]
/// consumes it, so an editor cannot be touched after its bytes are produced,
/// and nothing outlives the call that created it.
#[derive(Debug)]
pub struct UnitEditor {
    unit: Unit,
}

impl UnitEditor {
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            unit: codec::decode(bytes)?,
        })
    }

    pub fn from_unit(unit: Unit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn name(&self) -> &str {
        &self.unit.name
    }

    pub fn simple_name(&self) -> &str {
        self.unit.simple_name()
    }

    /// Run `edit` on a copy of every method matching `pred`, in declaration
    /// order. The copies replace the originals only when every call succeeds,
    /// so a failing edit leaves the unit untouched. `edit` returns whether it
    /// changed its method.
    pub fn edit_methods<P, F, E>(&mut self, pred: P, mut edit: F) -> Result<EditCount, E>
    where
        P: Fn(&Method) -> bool,
        F: FnMut(&mut Method) -> Result<bool, E>,
    {
        let mut matched = 0;
        let mut staged = Vec::new();
        for (i, method) in self.unit.methods.iter().enumerate() {
            if !pred(method) {
                continue;
            }
            matched += 1;
            let mut copy = method.clone();
            if edit(&mut copy)? {
                staged.push((i, copy));
            }
        }
        let changed = staged.len();
        for (i, method) in staged {
            self.unit.methods[i] = method;
        }
        Ok(EditCount { matched, changed })
    }

    /// Re-verify and serialize. Consumes the editor.
    pub fn finish(self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.unit)
    }
}

/// Result of [`UnitEditor::edit_methods`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditCount {
    pub matched: usize,
    pub changed: usize,
}

/// Insert `code` before index `pos` of `block`, relocating jump targets.
///
/// Jumps into the tail of the block are shifted past the new code. A jump to
/// exactly `pos` lands on the inserted code when `redirect` is set and on the
/// original instruction otherwise. Top-level jumps inside `code` are taken to
/// be relative to its own start.
pub fn splice(block: &mut Vec<Instr>, pos: usize, code: Vec<Instr>, redirect: bool) {
    let added = code.len() as u32;
    let pos32 = pos as u32;
    for instr in block.iter_mut() {
        if let Some(target) = instr.jump_target_mut() {
            if *target > pos32 || (*target == pos32 && !redirect) {
                *target += added;
            }
        }
    }
    let code = code.into_iter().map(|mut instr| {
        if let Some(target) = instr.jump_target_mut() {
            *target += pos32;
        }
        instr
    });
    block.splice(pos..pos, code);
}
