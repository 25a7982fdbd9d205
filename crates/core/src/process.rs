//! Startup details about the hosting process, written to the trace file when
//! the config asks for them.

use std::env;

use crate::config::Config;
use crate::trace::TraceSink;

/// Render `title` followed by one indented `key=value` line per pair, sorted
/// by key.
fn block<I>(title: &str, pairs: I) -> String
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut pairs: Vec<_> = pairs.into_iter().collect();
    pairs.sort();
    let mut out = format!("{}:", title);
    for (key, value) in pairs {
        out.push_str(&format!("\n  {}={}", key, value));
    }
    out
}

/// Facts about this process: build, platform, pid, directories, arguments.
pub fn process_properties() -> String {
    let unknown = || "<unknown>".to_string();
    let props = vec![
        ("graft.version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("os.name".to_string(), env::consts::OS.to_string()),
        ("os.family".to_string(), env::consts::FAMILY.to_string()),
        ("os.arch".to_string(), env::consts::ARCH.to_string()),
        ("process.id".to_string(), std::process::id().to_string()),
        ("process.args".to_string(), env::args().collect::<Vec<_>>().join(" ")),
        (
            "process.cwd".to_string(),
            env::current_dir().map(|d| d.display().to_string()).unwrap_or_else(|_| unknown()),
        ),
        (
            "process.exe".to_string(),
            env::current_exe().map(|p| p.display().to_string()).unwrap_or_else(|_| unknown()),
        ),
        ("temp.dir".to_string(), env::temp_dir().display().to_string()),
        (
            "cpu.count".to_string(),
            std::thread::available_parallelism().map(|n| n.to_string()).unwrap_or_else(|_| unknown()),
        ),
    ];
    block("Process properties", props)
}

/// Every environment variable visible to the process. Values that are not
/// valid UTF-8 are rendered lossily.
pub fn environment_variables() -> String {
    block(
        "Environment variables",
        env::vars_os().map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned())),
    )
}

/// Write the startup blocks `config` enables to `sink`.
pub fn trace_startup_details(config: &Config, sink: &dyn TraceSink) {
    if config.print_process_properties {
        sink.trace(&process_properties());
    }
    if config.print_environment_variables {
        sink.trace(&environment_variables());
    }
}
