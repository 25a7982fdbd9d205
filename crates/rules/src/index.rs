//! Lookup from unit name to the rules that target it.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use crate::model::Rule;

/// Rules grouped by lower-cased target unit name.
///
/// Built once per rule set and never mutated; a new set means a new index.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    by_unit: HashMap<String, Vec<Rule>>,
    rule_count: usize,
}

impl RuleIndex {
    pub fn build(rules: &[Rule]) -> Self {
        let mut by_unit: HashMap<String, Vec<Rule>> = HashMap::new();
        for rule in rules {
            by_unit.entry(rule.unit_key()).or_default().push(rule.clone());
        }
        Self {
            by_unit,
            rule_count: rules.len(),
        }
    }

    /// Rules targeting `unit_name` (case-insensitive), in source order.
    pub fn rules_for(&self, unit_name: &str) -> &[Rule] {
        self.by_unit
            .get(&*lowercase(unit_name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn matches(&self, unit_name: &str) -> bool {
        !self.rules_for(unit_name).is_empty()
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.rule_count
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count == 0
    }

    /// Lower-cased unit names with at least one rule.
    pub fn unit_keys(&self) -> impl Iterator<Item = &str> {
        self.by_unit.keys().map(String::as_str)
    }

    /// Unit keys whose rule lists differ between `self` and `other`: units
    /// present in only one of the two, plus units whose rules changed.
    pub fn affected_units(&self, other: &RuleIndex) -> BTreeSet<String> {
        let mut affected = BTreeSet::new();
        for (unit, rules) in &self.by_unit {
            if other.by_unit.get(unit) != Some(rules) {
                affected.insert(unit.clone());
            }
        }
        for unit in other.by_unit.keys() {
            if !self.by_unit.contains_key(unit) {
                affected.insert(unit.clone());
            }
        }
        affected
    }
}

fn lowercase(name: &str) -> Cow<'_, str> {
    if name.chars().any(char::is_uppercase) {
        Cow::Owned(name.to_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}
