//! Tests for the rule source module.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::error::RuleError;

const CONFIG: &str = r#"
traceFileLocation: /tmp/graft
configRefreshInterval: 250
agentRules:
  - "demo.Greeter::greet@INGRESS::ARGS"
  - "demo.Greeter::greet@EGRESS::RET"
  - "demo.Greeter::greet@SOMEWHERE::RET"
"#;

fn temp_source(contents: &str) -> (TempDir, RuleSource) {
    let dir = TempDir::new().expect("create tempdir");
    let path = dir.path().join("graft.yaml");
    fs::write(&path, contents).unwrap();
    (dir, RuleSource::new(path))
}

#[test]
fn load_parses_config_and_rules() {
    let (_dir, source) = temp_source(CONFIG);
    let loaded = source.load().unwrap();
    assert_eq!(loaded.config.config_refresh_interval, 250);
    assert_eq!(loaded.report.rules.len(), 2);
    assert_eq!(loaded.report.rejected.len(), 1);
    assert_eq!(loaded.report.rejected[0].position, 3);
}

#[test]
fn load_fails_on_invalid_yaml() {
    let (_dir, source) = temp_source("agentRules: [unterminated");
    assert!(matches!(source.load(), Err(RuleError::Config(_))));
}

#[test]
fn load_fails_when_file_is_missing() {
    let dir = TempDir::new().unwrap();
    let source = RuleSource::new(dir.path().join("absent.yaml"));
    assert!(source.load().is_err());
    assert!(matches!(source.modified(), Err(RuleError::Io(_))));
}

#[test]
fn modified_advances_on_rewrite() {
    let (_dir, source) = temp_source(CONFIG);
    let before = source.modified().unwrap();
    let later = before + Duration::from_secs(10);
    let file = fs::File::options().write(true).open(source.path()).unwrap();
    file.set_modified(later).unwrap();
    assert_eq!(source.modified().unwrap(), later);
}
