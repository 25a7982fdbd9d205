//! Generated diagnostic code.
//!
//! Each function returns the body of one placement; the caller wraps it in a
//! guard. Emitted lines read `{<unit>.<method>} | <EVENT> | <TAG> | <payload>`.

use graft_rules::Event;
use graft_unit::{Instr, Marker, Value, ValueType};

/// The `{unit.method}` label every emitted line starts with.
pub(crate) struct Site {
    label: String,
}

impl Site {
    pub(crate) fn new(unit: &str, method: &str) -> Self {
        Self {
            label: format!("{{{}.{}}}", unit, method),
        }
    }

    fn line(&self, event: Event, tag: &str) -> String {
        format!("{} | {} | {}", self.label, event, tag)
    }

    fn prefix(&self, event: Event, tag: &str) -> String {
        format!("{} | {} | {} | ", self.label, event, tag)
    }
}

fn push(text: String) -> Instr {
    Instr::Push(Value::Str(text))
}

/// Guard whose errors are swallowed.
pub(crate) fn silent(marker: Marker, body: Vec<Instr>) -> Instr {
    Instr::Guard {
        marker: Some(marker),
        body,
        handler: Vec::new(),
    }
}

/// Guard for user code: errors are reported, never propagated.
pub(crate) fn reported(marker: Marker, body: Vec<Instr>, unit: &str, method: &str) -> Instr {
    Instr::Guard {
        marker: Some(marker),
        body,
        handler: vec![
            push(format!("Custom code threw an exception in {}.{}: ", unit, method)),
            Instr::Caught,
            Instr::Concat,
            Instr::ReportError,
        ],
    }
}

pub(crate) fn stack(site: &Site, event: Event) -> Vec<Instr> {
    vec![Instr::StackTrace(site.line(event, "STACK"))]
}

pub(crate) fn heap(site: &Site, event: Event) -> Vec<Instr> {
    vec![Instr::HeapDump, push(site.line(event, "HEAP")), Instr::Trace]
}

/// ` 0=<v0> 1=<v1> …` over the parameter slots, or `NULL` without parameters.
pub(crate) fn args(site: &Site, params: usize) -> Vec<Instr> {
    if params == 0 {
        return vec![push(site.prefix(Event::Ingress, "ARGS") + "NULL"), Instr::Trace];
    }
    let mut code = vec![push(site.prefix(Event::Ingress, "ARGS"))];
    for slot in 0..params {
        code.extend([
            push(format!(" {}=", slot)),
            Instr::Concat,
            Instr::Load(slot as u16),
            Instr::Concat,
        ]);
    }
    code.push(Instr::Trace);
    code
}

pub(crate) fn ret_void(site: &Site) -> Vec<Instr> {
    vec![push(site.prefix(Event::Egress, "RET") + "VOID"), Instr::Trace]
}

/// Emit the value saved in `slot`. Object values print `NULL` when null.
pub(crate) fn ret_value(site: &Site, slot: u16, ty: ValueType) -> Vec<Instr> {
    let prefix = site.prefix(Event::Egress, "RET");
    let emit = [push(prefix.clone()), Instr::Load(slot), Instr::Concat, Instr::Trace];
    if ty.is_primitive() {
        return emit.to_vec();
    }
    // 0 load; 1 is_null; 2 jump_unless 6; 3..5 null line; 6..9 value line
    let mut code = vec![
        Instr::Load(slot),
        Instr::IsNull,
        Instr::JumpUnless(6),
        push(prefix + "NULL"),
        Instr::Trace,
        Instr::Jump(10),
    ];
    code.extend(emit);
    code
}

pub(crate) fn profile_start(slot: u16) -> Vec<Instr> {
    vec![Instr::Clock, Instr::Store(slot)]
}

pub(crate) fn profile_end(site: &Site, slot: u16) -> Vec<Instr> {
    vec![
        push(format!("{} | PROFILE | Execution time: ", site.label)),
        Instr::Clock,
        Instr::Load(slot),
        Instr::Sub,
        Instr::Push(Value::Int(1_000_000)),
        Instr::Div,
        Instr::Concat,
        push("ms".to_string()),
        Instr::Concat,
        Instr::Trace,
    ]
}
