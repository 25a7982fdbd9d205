//! Rule values and the (event, action) → placement mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, RuleError};

/// Where in a method a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Event {
    /// Method entry.
    Ingress,
    /// Every normal method exit.
    Egress,
    /// A literal instruction offset.
    Codepoint,
    /// Entry and exit, measuring elapsed time.
    Profile,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Event::Ingress => "INGRESS",
            Event::Egress => "EGRESS",
            Event::Codepoint => "CODEPOINT",
            Event::Profile => "PROFILE",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INGRESS" => Ok(Event::Ingress),
            "EGRESS" => Ok(Event::Egress),
            "CODEPOINT" => Ok(Event::Codepoint),
            "PROFILE" => Ok(Event::Profile),
            _ => Err(ParseError::UnknownEvent(s.trim().to_string())),
        }
    }
}

/// What a rule does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Stack,
    Heap,
    Args,
    Ret,
    Add,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Stack => "STACK",
            Action::Heap => "HEAP",
            Action::Args => "ARGS",
            Action::Ret => "RET",
            Action::Add => "ADD",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STACK" => Ok(Action::Stack),
            "HEAP" => Ok(Action::Heap),
            "ARGS" => Ok(Action::Args),
            "RET" => Ok(Action::Ret),
            "ADD" => Ok(Action::Add),
            _ => Err(ParseError::UnknownAction(s.trim().to_string())),
        }
    }
}

/// One instrumentation intent. Immutable once built; every constructed
/// `Rule` has passed the same checks the parser applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    unit_name: String,
    method_name: String,
    event: Event,
    action: Option<Action>,
    offset: u32,
    code: Option<String>,
}

impl Rule {
    /// Validate and build a rule.
    ///
    /// `offset` is required for CODEPOINT and refused elsewhere; PROFILE takes
    /// no action, every other event needs one; only ADD carries code.
    pub fn new(
        unit_name: &str,
        method_name: &str,
        event: Event,
        action: Option<Action>,
        offset: Option<u32>,
        code: Option<&str>,
    ) -> Result<Self, ParseError> {
        let unit_name = unit_name.trim();
        let method_name = method_name.trim();
        if unit_name.is_empty() {
            return Err(ParseError::EmptyUnit);
        }
        if method_name.is_empty() {
            return Err(ParseError::EmptyMethod);
        }
        if unit_name.contains(char::is_whitespace) || method_name.contains(char::is_whitespace) {
            return Err(ParseError::Whitespace);
        }

        let offset = match (event, offset) {
            (Event::Codepoint, Some(o)) => o,
            (Event::Codepoint, None) => return Err(ParseError::MissingOffset),
            (_, Some(_)) => return Err(ParseError::UnexpectedOffset(event)),
            (_, None) => 0,
        };

        match (event, action) {
            (Event::Profile, Some(a)) => return Err(ParseError::UnexpectedAction(a)),
            (Event::Profile, None) => {}
            (_, None) => return Err(ParseError::MissingAction(event)),
            (_, Some(_)) => {}
        }

        let code = code.map(str::trim).filter(|c| !c.is_empty());
        match (action, code) {
            (Some(Action::Add), None) => return Err(ParseError::MissingCode),
            (Some(a), Some(_)) if a != Action::Add => return Err(ParseError::UnexpectedCode(a)),
            (None, Some(_)) => return Err(ParseError::UnexpectedCode(Action::Add)),
            _ => {}
        }

        Ok(Self {
            unit_name: unit_name.to_string(),
            method_name: method_name.to_string(),
            event,
            action,
            offset,
            code: code.map(str::to_string),
        })
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn action(&self) -> Option<Action> {
        self.action
    }

    /// Instruction offset; meaningful only for CODEPOINT.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Injected-code text; present only for ADD.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Index key: the unit name, lower-cased.
    pub fn unit_key(&self) -> String {
        self.unit_name.to_lowercase()
    }

    /// Resolve the (event, action) pair into something the injector can apply.
    pub fn placement(&self) -> Result<Placement, RuleError> {
        let unsupported = |action| RuleError::Unsupported {
            event: self.event,
            action,
        };
        let custom = || self.code.clone().unwrap_or_default();

        match (self.event, self.action) {
            (Event::Profile, _) => Ok(Placement::Profile),
            (_, None) => Err(RuleError::MissingAction(self.event)),
            (Event::Ingress, Some(action)) => Ok(Placement::Entry(match action {
                Action::Stack => EntryAction::Stack,
                Action::Heap => EntryAction::Heap,
                Action::Args => EntryAction::Args,
                Action::Add => EntryAction::Custom(custom()),
                Action::Ret => return Err(unsupported(action)),
            })),
            (Event::Egress, Some(action)) => Ok(Placement::Exit(match action {
                Action::Stack => ExitAction::Stack,
                Action::Heap => ExitAction::Heap,
                Action::Ret => ExitAction::Return,
                Action::Add => ExitAction::Custom(custom()),
                Action::Args => return Err(unsupported(action)),
            })),
            (Event::Codepoint, Some(action)) => {
                let point = match action {
                    Action::Stack => PointAction::Stack,
                    Action::Heap => PointAction::Heap,
                    Action::Add => PointAction::Custom(custom()),
                    Action::Args | Action::Ret => return Err(unsupported(action)),
                };
                Ok(Placement::At {
                    offset: self.offset,
                    action: point,
                })
            }
        }
    }
}

/// Canonical text form; parses back to an equal rule.
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}@{}", self.unit_name, self.method_name, self.event)?;
        if self.event == Event::Codepoint {
            write!(f, "({})", self.offset)?;
        }
        if let Some(action) = self.action {
            write!(f, "::{}", action)?;
        }
        if let Some(code) = &self.code {
            write!(f, "::[{}]", code)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryAction {
    Stack,
    Heap,
    Args,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitAction {
    Stack,
    Heap,
    Return,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointAction {
    Stack,
    Heap,
    Custom(String),
}

/// A supported (event, action) pair. Combinations with no meaning
/// (arguments at exit, return value at entry) have no variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Entry(EntryAction),
    Exit(ExitAction),
    At { offset: u32, action: PointAction },
    Profile,
}
