use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use graft_core::config::load_dotenv;
use graft_core::{create_run_dir, trace_startup_details, Config, TraceFile, TraceSink};
use graft_engine::Engine;
use graft_host::{HeapDumper, VirtualRuntime};
use graft_rules::parse_rules;
use graft_unit::{assemble_unit, codec, disassemble};
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub fn assemble(source: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let text = fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let unit = assemble_unit(&text).with_context(|| format!("failed to assemble {}", source.display()))?;
    let bytes = codec::encode(&unit).with_context(|| format!("unit {} is not valid", unit.name))?;

    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| source.with_extension("unit"));
    fs::write(&out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
    info!(unit = %unit.name, path = %out.display(), bytes = bytes.len(), "assembled");
    Ok(out)
}

pub fn inspect(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let unit = codec::decode(&bytes).with_context(|| format!("{} is not a unit", path.display()))?;
    Ok(disassemble(&unit))
}

pub fn rules(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let report = parse_rules(&config.agent_rules);
    for rule in &report.rules {
        println!("ok       {}", rule);
    }
    for rejected in &report.rejected {
        println!("rejected #{} {:?}: {}", rejected.position, rejected.entry, rejected.reason);
    }
    if !report.is_clean() {
        bail!("{} of {} entries rejected", report.rejected.len(), report.rejected.len() + report.rules.len());
    }
    Ok(())
}

/// Split `<unit>::<method>`.
pub fn parse_entry(entry: &str) -> Result<(&str, &str)> {
    match entry.split_once("::") {
        Some((unit, method)) if !unit.is_empty() && !method.is_empty() => Ok((unit, method)),
        _ => bail!("entry must be <unit>::<method>, got {:?}", entry),
    }
}

/// Every `*.unit` file under `dir` as `(unit name, bytes)`, sorted by name.
pub fn find_units(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut units = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().is_some_and(|e| e == "unit") {
            continue;
        }
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        match codec::decode(&bytes) {
            Ok(unit) => units.push((unit.name, bytes)),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable unit file"),
        }
    }
    units.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(units)
}

/// Startup banner: version and the command line this process was started with.
pub fn banner<I>(args: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let command_line = args.into_iter().collect::<Vec<_>>().join(" ");
    format!("graft {} started: {}", env!("CARGO_PKG_VERSION"), command_line)
}

pub async fn run(config_path: &Path, units_dir: &Path, entry: &str, watch: bool) -> Result<()> {
    let started = banner(std::env::args());
    info!("{}", started);
    load_dotenv();
    let (entry_unit, entry_method) = parse_entry(entry)?;
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.log_summary();

    let run_dir = create_run_dir(&config);
    let sink = Arc::new(
        TraceFile::open(&run_dir).with_context(|| format!("failed to open trace file in {}", run_dir.display()))?,
    );
    info!(path = %sink.path().display(), "tracing to file");
    sink.trace(&started);
    trace_startup_details(&config, sink.as_ref());
    let host = Arc::new(
        VirtualRuntime::new(sink.clone(), HeapDumper::new(&run_dir, config.max_heap_dumps)).with_stdout(),
    );

    let reload_from = watch.then_some(config_path);
    let engine = Engine::start(&config, &run_dir, reload_from, host.clone(), sink, watch)
        .context("failed to start engine")?;
    for rejected in &engine.initial_rules().rejected {
        warn!(position = rejected.position, entry = %rejected.entry, reason = %rejected.reason, "rule skipped");
    }

    let units = find_units(units_dir)?;
    info!(units = units.len(), dir = %units_dir.display(), "loading units");
    for ((name, _), result) in units.iter().zip(host.define_all(&units)) {
        if let Err(e) = result {
            error!(unit = %name, error = %e, "failed to load unit");
        }
    }

    invoke(&host, entry_unit, entry_method);
    if watch {
        let period = config.refresh_interval().unwrap_or(Duration::from_secs(5));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        info!(interval_ms = period.as_millis() as u64, "watching for rule changes, Ctrl-C to stop");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    let host = Arc::clone(&host);
                    let (unit, method) = (entry_unit.to_string(), entry_method.to_string());
                    tokio::task::spawn_blocking(move || invoke(&host, &unit, &method))
                        .await
                        .context("entry invocation panicked")?;
                }
            }
        }
    }

    engine.shutdown();
    Ok(())
}

fn invoke(host: &VirtualRuntime, unit: &str, method: &str) {
    match host.call(unit, method, Vec::new()) {
        Ok(Some(value)) => info!(entry = %format!("{}::{}", unit, method), result = %value, "entry returned"),
        Ok(None) => info!(entry = %format!("{}::{}", unit, method), "entry returned"),
        Err(e) => error!(entry = %format!("{}::{}", unit, method), error = %e, "entry failed"),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const GREETER: &str = "unit demo.Greeter\nmethod greet() -> str\n  push \"hi\"\n  return\nend\n";

    #[test]
    fn banner_carries_version_and_command_line() {
        let args = ["graft", "run", "--entry", "demo.Main::main"].map(String::from);
        assert_eq!(
            banner(args),
            format!("graft {} started: graft run --entry demo.Main::main", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn entry_points_need_both_halves() {
        assert_eq!(parse_entry("demo.Main::main").unwrap(), ("demo.Main", "main"));
        assert!(parse_entry("demo.Main").is_err());
        assert!(parse_entry("::main").is_err());
    }

    #[test]
    fn assembled_units_are_found_and_inspectable() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("lib");
        fs::create_dir_all(&nested).unwrap();
        let src = nested.join("greeter.gasm");
        fs::write(&src, GREETER).unwrap();
        fs::write(dir.path().join("junk.unit"), b"junk").unwrap();

        let out = assemble(&src, None).unwrap();
        assert_eq!(out, nested.join("greeter.unit"));
        assert!(inspect(&out).unwrap().starts_with("unit demo.Greeter\n"));

        let units = find_units(dir.path()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].0, "demo.Greeter");
    }

    #[test]
    fn rules_report_fails_on_rejections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graft.yaml");
        fs::write(
            &path,
            "traceFileLocation: /tmp/graft\nagentRules:\n  - \"demo.A::run@INGRESS::STACK\"\n",
        )
        .unwrap();
        assert!(rules(&path).is_ok());

        fs::write(&path, "traceFileLocation: /tmp/graft\nagentRules:\n  - \"demo.A::run\"\n").unwrap();
        assert!(rules(&path).is_err());
    }
}
