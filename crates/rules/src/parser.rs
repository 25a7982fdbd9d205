//! Rule text parsing.
//!
//! One rule per entry:
//!
//! ```text
//! <unit>::<method>@<EVENT>[(<offset>)][::<ACTION>[::<code>]]
//! ```
//!
//! Entries are independent: a malformed entry is reported and skipped, the
//! rest still parse. Blank entries and `#` comments are ignored.

use tracing::warn;

use crate::error::ParseError;
use crate::model::{Action, Event, Rule};

/// An entry that did not produce a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// 1-based position of the entry in its source.
    pub position: usize,
    pub entry: String,
    pub reason: ParseError,
}

/// Outcome of parsing a set of entries.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub rules: Vec<Rule>,
    pub rejected: Vec<Rejected>,
}

impl ParseReport {
    /// Whether every non-blank entry produced a rule.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Parse one entry.
pub fn parse_rule(entry: &str) -> Result<Rule, ParseError> {
    let entry = entry.trim();
    let (unit, rest) = entry.split_once("::").ok_or(ParseError::MissingMethod)?;
    let (method, rest) = rest.split_once('@').ok_or(ParseError::MissingEvent)?;

    let (event_part, tail) = match rest.split_once("::") {
        Some((event, tail)) => (event, Some(tail)),
        None => (rest, None),
    };
    let (event_name, offset) = split_offset(event_part)?;
    let event: Event = event_name.parse()?;

    let (action, code) = match tail {
        None => (None, None),
        Some(tail) => match tail.split_once("::") {
            Some((action, code)) => (Some(action.parse::<Action>()?), Some(strip_brackets(code))),
            None => (Some(tail.parse::<Action>()?), None),
        },
    };

    Rule::new(unit, method, event, action, offset, code)
}

/// `CODEPOINT(12)` → (`CODEPOINT`, Some(12)).
fn split_offset(event_part: &str) -> Result<(&str, Option<u32>), ParseError> {
    let Some((name, arg)) = event_part.split_once('(') else {
        return Ok((event_part, None));
    };
    let arg = arg.trim_end();
    let inner = arg
        .strip_suffix(')')
        .ok_or_else(|| ParseError::InvalidOffset(arg.to_string()))?
        .trim();
    let offset = inner
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidOffset(inner.to_string()))?;
    Ok((name, Some(offset)))
}

fn strip_brackets(code: &str) -> &str {
    let code = code.trim();
    code.strip_prefix('[')
        .and_then(|c| c.strip_suffix(']'))
        .unwrap_or(code)
}

/// Parse a list of entries, collecting rules and rejections.
pub fn parse_rules<I, S>(entries: I) -> ParseReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = ParseReport::default();
    for (i, entry) in entries.into_iter().enumerate() {
        let entry = entry.as_ref().trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        match parse_rule(entry) {
            Ok(rule) => report.rules.push(rule),
            Err(reason) => {
                warn!(position = i + 1, entry = %entry, error = %reason, "rejected rule entry");
                report.rejected.push(Rejected {
                    position: i + 1,
                    entry: entry.to_string(),
                    reason,
                });
            }
        }
    }
    report
}

/// Parse newline-separated rule text.
pub fn parse_rule_text(text: &str) -> ParseReport {
    parse_rules(text.lines())
}
