//! Instrumentation rules: the rule model, its text syntax, the per-unit
//! index consulted on every load, and the config file rules are read from.

pub mod error;
pub mod index;
pub mod model;
pub mod parser;
pub mod source;

pub use error::{ParseError, RuleError};
pub use index::RuleIndex;
pub use model::{Action, EntryAction, Event, ExitAction, Placement, PointAction, Rule};
pub use parser::{parse_rule, parse_rule_text, parse_rules, ParseReport, Rejected};
pub use source::{LoadedRules, RuleSource};
