//! Rule application: turns one rule into guarded code inside the
//! matching methods of a unit.
//!
//! Each placement is a single marked guard. A method that already carries the
//! rule's marker is left alone, so applying a rule to bytes it was already
//! applied to changes nothing.

mod marker;
mod points;
mod templates;

use graft_rules::{EntryAction, Event, ExitAction, Placement, PointAction, Rule};
use graft_unit::{assemble_snippet, Instr, Marker, Method, UnitEditor, CONSTRUCTOR_NAME};
use tracing::trace;

use crate::error::InjectError;

pub use marker::marker_for;
use templates::Site;

/// Apply `rule` to every matching method of the unit in `editor`.
///
/// Returns how many methods gained the placement; zero means every target was
/// already instrumented by this rule. On error the editor's unit is left as
/// it was.
pub fn inject(editor: &mut UnitEditor, rule: &Rule) -> Result<usize, InjectError> {
    let placement = rule.placement()?;
    let unit = editor.name().to_string();
    let method_name = rule.method_name();
    let constructor = method_name == CONSTRUCTOR_NAME || method_name == editor.simple_name();

    if constructor && placement == Placement::Exit(ExitAction::Return) {
        return Err(InjectError::ReturnOnConstructor {
            unit,
            method: method_name.to_string(),
        });
    }

    let custom = match &placement {
        Placement::Entry(EntryAction::Custom(code))
        | Placement::Exit(ExitAction::Custom(code))
        | Placement::At {
            action: PointAction::Custom(code),
            ..
        } => assemble_snippet(code)?,
        _ => Vec::new(),
    };

    let plan = Plan {
        placement: &placement,
        marker: marker_for(rule),
        site: Site::new(&unit, method_name),
        unit: &unit,
        method: method_name,
        custom: &custom,
    };

    let count = editor.edit_methods(
        |m| {
            if constructor {
                m.is_constructor()
            } else {
                !m.is_constructor() && m.name == method_name
            }
        },
        |m| -> Result<bool, InjectError> {
            if m.has_marker(plan.marker) {
                trace!(unit = %unit, method = %m.signature(), rule = %rule, "placement already present");
                return Ok(false);
            }
            plan.apply(m)?;
            Ok(true)
        },
    )?;

    if count.matched == 0 {
        return Err(InjectError::TargetNotFound {
            unit,
            method: method_name.to_string(),
        });
    }
    Ok(count.changed)
}

/// Everything needed to instrument one method for one rule.
struct Plan<'a> {
    placement: &'a Placement,
    marker: Marker,
    site: Site,
    unit: &'a str,
    method: &'a str,
    custom: &'a [Instr],
}

impl Plan<'_> {
    fn silent(&self, body: Vec<Instr>) -> Instr {
        templates::silent(self.marker, body)
    }

    fn custom(&self) -> Instr {
        templates::reported(self.marker, self.custom.to_vec(), self.unit, self.method)
    }

    fn apply(&self, m: &mut Method) -> Result<(), InjectError> {
        match self.placement {
            Placement::Entry(action) => {
                let guard = match action {
                    EntryAction::Stack => self.silent(templates::stack(&self.site, Event::Ingress)),
                    EntryAction::Heap => self.silent(templates::heap(&self.site, Event::Ingress)),
                    EntryAction::Args => self.silent(templates::args(&self.site, m.params.len())),
                    EntryAction::Custom(_) => self.custom(),
                };
                points::at_entry(m, vec![guard]);
            }
            Placement::Exit(ExitAction::Return) => match m.returns {
                None => self.at_exits(m, self.silent(templates::ret_void(&self.site))),
                Some(ty) => {
                    let slot = self.allocate(m)?;
                    points::at_exits(m, || {
                        vec![
                            Instr::Dup,
                            Instr::Store(slot),
                            self.silent(templates::ret_value(&self.site, slot, ty)),
                        ]
                    });
                }
            },
            Placement::Exit(ExitAction::Stack) => {
                self.at_exits(m, self.silent(templates::stack(&self.site, Event::Egress)))
            }
            Placement::Exit(ExitAction::Heap) => {
                self.at_exits(m, self.silent(templates::heap(&self.site, Event::Egress)))
            }
            Placement::Exit(ExitAction::Custom(_)) => self.at_exits(m, self.custom()),
            Placement::At { offset, action } => {
                let guard = match action {
                    PointAction::Stack => self.silent(templates::stack(&self.site, Event::Codepoint)),
                    PointAction::Heap => self.silent(templates::heap(&self.site, Event::Codepoint)),
                    PointAction::Custom(_) => self.custom(),
                };
                points::at_offset(m, *offset, vec![guard])?;
            }
            Placement::Profile => {
                let slot = self.allocate(m)?;
                points::at_entry(m, vec![self.silent(templates::profile_start(slot))]);
                points::at_exits(m, || vec![self.silent(templates::profile_end(&self.site, slot))]);
            }
        }
        Ok(())
    }

    fn at_exits(&self, m: &mut Method, guard: Instr) {
        points::at_exits(m, || vec![guard.clone()]);
    }

    fn allocate(&self, m: &mut Method) -> Result<u16, InjectError> {
        m.allocate_local().ok_or_else(|| InjectError::LocalsExhausted {
            method: m.signature(),
        })
    }
}
