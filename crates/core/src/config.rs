use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

fn default_true() -> bool {
    true
}

fn default_max_heap_dumps() -> u32 {
    3
}

fn default_refresh_interval_ms() -> u64 {
    5000
}

fn default_exclusions() -> Vec<String> {
    vec!["graft.".to_string(), "sys.".to_string()]
}

// ── Top-level config ──────────────────────────────────────────

/// Engine configuration, read from a YAML file with camelCase keys.
///
/// The same file doubles as the rule source watched by the reload loop:
/// `agentRules` holds one rule entry per list item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory under which the per-run trace directory is created.
    pub trace_file_location: PathBuf,
    #[serde(default = "default_true")]
    pub should_instrument: bool,
    /// Emit a trace line for every unit delivered to the interceptor.
    #[serde(default)]
    pub trace_unit_loads: bool,
    #[serde(default = "default_max_heap_dumps")]
    pub max_heap_dumps: u32,
    /// Reload poll interval in milliseconds. Zero disables hot reload.
    #[serde(default = "default_refresh_interval_ms")]
    pub config_refresh_interval: u64,
    /// Unit name prefixes never traced on load.
    #[serde(default = "default_exclusions")]
    pub load_trace_exclusions: Vec<String>,
    /// Write the process properties to the trace file at startup.
    #[serde(default)]
    pub print_process_properties: bool,
    /// Write the environment variables to the trace file at startup.
    #[serde(default)]
    pub print_environment_variables: bool,
    #[serde(default)]
    pub agent_rules: Vec<String>,
}

impl Config {
    /// Read, parse, apply env overrides and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config document without touching the environment.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Minimal config pointing at `trace_dir`, with defaults everywhere else.
    pub fn with_trace_dir(trace_dir: impl Into<PathBuf>) -> Self {
        Self {
            trace_file_location: trace_dir.into(),
            should_instrument: true,
            trace_unit_loads: false,
            max_heap_dumps: default_max_heap_dumps(),
            config_refresh_interval: default_refresh_interval_ms(),
            load_trace_exclusions: default_exclusions(),
            print_process_properties: false,
            print_environment_variables: false,
            agent_rules: Vec::new(),
        }
    }

    /// Overlay `GRAFT_*` environment variables (call `load_dotenv()` first).
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_opt("GRAFT_TRACE_DIR") {
            self.trace_file_location = PathBuf::from(dir);
        }
        if let Some(ms) = env_parsed("GRAFT_REFRESH_INTERVAL_MS") {
            self.config_refresh_interval = ms;
        }
        if let Some(max) = env_parsed("GRAFT_MAX_HEAP_DUMPS") {
            self.max_heap_dumps = max;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_file_location.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "traceFileLocation must not be empty".to_string(),
            ));
        }
        if self.load_trace_exclusions.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::Invalid(
                "loadTraceExclusions must not contain empty prefixes".to_string(),
            ));
        }
        Ok(())
    }

    /// Reload interval, or `None` when hot reload is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.config_refresh_interval > 0).then(|| Duration::from_millis(self.config_refresh_interval))
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  trace:       location={}", self.trace_file_location.display());
        tracing::info!("  instrument:  enabled={}, unit_load_trace={}", self.should_instrument, self.trace_unit_loads);
        tracing::info!("  heap:        max_dumps={}", self.max_heap_dumps);
        tracing::info!("  reload:      interval_ms={}", self.config_refresh_interval);
        tracing::info!(
            "  startup:     process_properties={}, environment={}",
            self.print_process_properties,
            self.print_environment_variables
        );
        tracing::info!("  rules:       {} entries", self.agent_rules.len());
    }
}

/// Name of the per-run trace directory: `graft_<pid>_<YYYYMMDD_HHMMSS>`.
pub fn run_dir_name(pid: u32, started: chrono::DateTime<chrono::Local>) -> String {
    format!("graft_{}_{}", pid, started.format("%Y%m%d_%H%M%S"))
}

/// Create this run's directory under the configured trace location.
///
/// Falls back to the trace location itself when the run directory cannot be
/// created, so diagnostics still have somewhere to go.
pub fn create_run_dir(config: &Config) -> PathBuf {
    let base = &config.trace_file_location;
    let run_dir = base.join(run_dir_name(std::process::id(), chrono::Local::now()));
    match fs::create_dir_all(&run_dir) {
        Ok(()) => run_dir,
        Err(e) => {
            tracing::warn!(
                path = %run_dir.display(),
                error = %e,
                "failed to create run directory, using trace location"
            );
            if let Err(e) = fs::create_dir_all(base) {
                tracing::warn!(path = %base.display(), error = %e, "failed to create trace location");
            }
            base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let yaml = r#"
traceFileLocation: /tmp/graft
shouldInstrument: true
traceUnitLoads: true
maxHeapDumps: 1
configRefreshInterval: 250
printEnvironmentVariables: true
agentRules:
  - "demo.Foo::bar@PROFILE"
  - "demo.Foo::Foo@INGRESS::ARGS"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.trace_file_location, PathBuf::from("/tmp/graft"));
        assert!(config.trace_unit_loads);
        assert_eq!(config.max_heap_dumps, 1);
        assert_eq!(config.refresh_interval(), Some(Duration::from_millis(250)));
        assert!(config.print_environment_variables);
        assert!(!config.print_process_properties);
        assert_eq!(config.agent_rules.len(), 2);
    }

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = Config::from_yaml_str("traceFileLocation: /tmp/x\n").unwrap();
        assert!(config.should_instrument);
        assert!(!config.trace_unit_loads);
        assert_eq!(config.max_heap_dumps, 3);
        assert_eq!(config.config_refresh_interval, 5000);
        assert_eq!(config.load_trace_exclusions, vec!["graft.", "sys."]);
        assert!(config.agent_rules.is_empty());
    }

    #[test]
    fn missing_trace_location_is_a_parse_error() {
        let err = Config::from_yaml_str("shouldInstrument: true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_interval_disables_reload() {
        let mut config = Config::with_trace_dir("/tmp/x");
        config.config_refresh_interval = 0;
        assert_eq!(config.refresh_interval(), None);
    }

    #[test]
    fn validate_rejects_empty_location() {
        let config = Config::with_trace_dir("");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graft.yaml");
        fs::write(&path, "traceFileLocation: /tmp/graft\nagentRules: []\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert!(config.agent_rules.is_empty());
    }

    #[test]
    fn run_dir_name_has_pid_and_timestamp() {
        use chrono::TimeZone;
        let at = chrono::Local.with_ymd_and_hms(2024, 4, 11, 9, 5, 7).unwrap();
        assert_eq!(run_dir_name(42, at), "graft_42_20240411_090507");
    }

    #[test]
    fn create_run_dir_nests_under_trace_location() {
        let dir = tempfile::TempDir::new().unwrap();
        let run = create_run_dir(&Config::with_trace_dir(dir.path()));
        assert!(run.is_dir());
        assert_eq!(run.parent(), Some(dir.path()));
        let name = run.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("graft_{}_", std::process::id())));
    }

    #[test]
    fn create_run_dir_falls_back_to_trace_location() {
        let dir = tempfile::TempDir::new().unwrap();
        // a file where the run directory's parent should be
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, "").unwrap();
        let run = create_run_dir(&Config::with_trace_dir(&blocked));
        assert_eq!(run, blocked);
    }
}
