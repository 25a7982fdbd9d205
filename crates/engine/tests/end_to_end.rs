//! The engine driving a real host: rules in, instrumented behaviour out.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use graft_core::{CapturedTrace, Config, HostRuntime, TraceRecord};
use graft_engine::{Engine, ReloadController, TickOutcome, BACKUP_DIR};
use graft_host::{HeapDumper, VirtualRuntime};
use graft_rules::RuleSource;
use graft_unit::{assemble_unit, codec, Value};
use tempfile::TempDir;

const SHOP: &str = r#"
unit demo.Shop
ctor (str, int)
  return_void
end
method total(int) -> int
  load 0
  push 2
  mul
  return
end
method label() -> str
  push null
  return
end
method ping()
  return_void
end
method tick()
  return_void
end
"#;

fn bytes(src: &str) -> Vec<u8> {
    codec::encode(&assemble_unit(src).unwrap()).unwrap()
}

struct Harness {
    _dir: TempDir,
    host: Arc<VirtualRuntime>,
    sink: Arc<CapturedTrace>,
    engine: Engine,
}

fn config(dir: &Path, rules: &[&str]) -> Config {
    let mut config = Config::with_trace_dir(dir);
    config.agent_rules = rules.iter().map(|r| r.to_string()).collect();
    config
}

fn start_with(config: Config, dir: TempDir, host: Arc<VirtualRuntime>, sink: Arc<CapturedTrace>) -> Harness {
    let engine = Engine::start(&config, dir.path(), None, host.clone(), sink.clone(), false).unwrap();
    Harness {
        _dir: dir,
        host,
        sink,
        engine,
    }
}

fn start(rules: &[&str]) -> Harness {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CapturedTrace::new());
    let host = Arc::new(VirtualRuntime::new(sink.clone(), HeapDumper::new(dir.path(), 3)));
    start_with(config(dir.path(), rules), dir, host, sink)
}

fn lines_for(sink: &CapturedTrace, method: &str) -> Vec<String> {
    let label = format!("{{demo.Shop.{}}}", method);
    sink.lines().into_iter().filter(|l| l.starts_with(&label)).collect()
}

#[test]
fn constructor_args_and_profile() {
    let h = start(&["demo.Shop::Shop@INGRESS::ARGS", "demo.Shop::total@PROFILE"]);
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();

    h.host
        .instantiate("demo.Shop", vec![Value::from("apple"), Value::Int(3)])
        .unwrap();
    assert_eq!(
        lines_for(&h.sink, "Shop"),
        ["{demo.Shop.Shop} | INGRESS | ARGS |  0=apple 1=3"]
    );

    for _ in 0..2 {
        assert_eq!(
            h.host.call("demo.Shop", "total", vec![Value::Int(4)]),
            Ok(Some(Value::Int(8)))
        );
    }
    let profiled = lines_for(&h.sink, "total");
    assert_eq!(profiled.len(), 2);
    for line in profiled {
        let ms = line
            .strip_prefix("{demo.Shop.total} | PROFILE | Execution time: ")
            .and_then(|rest| rest.strip_suffix("ms"))
            .unwrap();
        assert!(ms.parse::<i64>().unwrap() >= 0, "{}", line);
    }
}

#[test]
fn return_values_and_argument_markers() {
    let h = start(&[
        "demo.Shop::label@EGRESS::RET",
        "demo.Shop::total@EGRESS::RET",
        "demo.Shop::ping@EGRESS::RET",
        "demo.Shop::tick@INGRESS::ARGS",
    ]);
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();

    assert_eq!(h.host.call("demo.Shop", "label", vec![]), Ok(Some(Value::Null)));
    assert_eq!(
        h.host.call("demo.Shop", "total", vec![Value::Int(5)]),
        Ok(Some(Value::Int(10)))
    );
    assert_eq!(h.host.call("demo.Shop", "ping", vec![]), Ok(None));
    assert_eq!(h.host.call("demo.Shop", "tick", vec![]), Ok(None));

    assert_eq!(
        h.sink.lines(),
        [
            "{demo.Shop.label} | EGRESS | RET | NULL",
            "{demo.Shop.total} | EGRESS | RET | 10",
            "{demo.Shop.ping} | EGRESS | RET | VOID",
            "{demo.Shop.tick} | INGRESS | ARGS | NULL",
        ]
    );
}

#[test]
fn illegal_combinations_leave_the_unit_untouched() {
    let h = start(&[
        "demo.Shop::total@EGRESS::ARGS",
        "demo.Shop::ping@CODEPOINT(0)::RET",
        "demo.Shop::tick@INGRESS::RET",
        "demo.Shop::Shop@EGRESS::RET",
    ]);
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();

    let icp = h.engine.interceptor().unwrap();
    let stats = icp.stats();
    assert_eq!(stats.rule_failures, 4);
    assert_eq!(stats.rewrites, 0);
    assert_eq!(*h.host.loaded("demo.Shop").unwrap(), assemble_unit(SHOP).unwrap());
    // the backup precedes any rewrite attempt
    assert!(icp.backups().is_backed_up("demo.Shop"));
}

#[test]
fn unmatched_units_pass_through_byte_identical() {
    let h = start(&["demo.Shop::ping@INGRESS::STACK"]);
    let other = bytes(&SHOP.replace("demo.Shop", "demo.Other"));
    let out = h.engine.interceptor().unwrap().intercept(Some("demo.Other"), &other);
    assert!(matches!(out, Cow::Borrowed(b) if b == other.as_slice()));
}

#[test]
fn custom_code_runs_and_failures_are_reported() {
    let h = start(&[
        "demo.Shop::tick@INGRESS::ADD::[push \"hello\"; print]",
        "demo.Shop::ping@INGRESS::ADD::[push 1; push 0; div; print]",
    ]);
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();

    assert_eq!(h.host.call("demo.Shop", "tick", vec![]), Ok(None));
    assert_eq!(h.host.call("demo.Shop", "ping", vec![]), Ok(None));
    assert_eq!(h.host.printed(), ["hello"]);
    assert_eq!(
        h.sink.errors(),
        ["Custom code threw an exception in demo.Shop.ping: division by zero"]
    );
}

#[test]
fn custom_code_cannot_disturb_the_method_stack() {
    let h = start(&[
        "demo.Shop::total@CODEPOINT(2)::ADD::[pop; pop]",
        "demo.Shop::total@EGRESS::ADD::[pop]",
        "demo.Shop::total@EGRESS::ADD::[push \"x\"; concat]",
    ]);
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();

    assert_eq!(
        h.host.call("demo.Shop", "total", vec![Value::Int(4)]),
        Ok(Some(Value::Int(8)))
    );
    let errors = h.sink.errors();
    assert_eq!(errors.len(), 3, "{:?}", errors);
    for error in errors {
        let reason = error
            .strip_prefix("Custom code threw an exception in demo.Shop.total: ")
            .unwrap();
        assert_eq!(reason, "operand stack underflow in demo.Shop.total");
    }
}

#[test]
fn heap_dumps_are_traced_and_bounded() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CapturedTrace::new());
    let mut cfg = config(dir.path(), &["demo.Shop::ping@INGRESS::HEAP"]);
    cfg.max_heap_dumps = 2;
    let host = Arc::new(VirtualRuntime::new(
        sink.clone(),
        HeapDumper::new(dir.path(), cfg.max_heap_dumps),
    ));
    let h = start_with(cfg, dir, host, sink);
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();

    for _ in 0..3 {
        assert_eq!(h.host.call("demo.Shop", "ping", vec![]), Ok(None));
    }
    assert_eq!(lines_for(&h.sink, "ping"), vec!["{demo.Shop.ping} | INGRESS | HEAP"; 3]);
    assert!(h.sink.errors().is_empty());

    let run_dir = h._dir.path();
    assert!(run_dir.join("heap_1.json").is_file());
    assert!(run_dir.join("heap_2.json").is_file());
    assert!(!run_dir.join("heap_3.json").exists());
    assert_eq!(h.host.heap_dumps_taken(), 2);

    let dump: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join("heap_1.json")).unwrap()).unwrap();
    assert_eq!(dump["call_stack"][0], "demo.Shop.ping");
}

#[test]
fn concurrent_loads_back_up_each_matching_unit_once() {
    let rules: Vec<String> = (0..10).map(|i| format!("demo.S{}::run@INGRESS::STACK", i)).collect();
    let rule_refs: Vec<&str> = rules.iter().map(String::as_str).collect();
    let h = start(&rule_refs);

    let units: Vec<(String, Vec<u8>)> = (0..100)
        .map(|i| {
            let name = format!("demo.S{}", i);
            let src = format!("unit {}\nmethod run()\n  return_void\nend\n", name);
            (name, bytes(&src))
        })
        .collect();
    assert!(h.host.define_all(&units).iter().all(Result::is_ok));

    let icp = h.engine.interceptor().unwrap();
    assert_eq!(icp.backups().count(), 10);
    assert_eq!(icp.stats().rewrites, 10);
    for i in 0..10 {
        let name = format!("demo.S{}", i);
        assert!(icp.is_transformed(&name));
        assert!(icp.backups().path_for(&name).starts_with(h.engine.run_dir().join(BACKUP_DIR)));
        assert!(icp.backups().path_for(&name).is_file());
    }
    assert!(!icp.is_transformed("demo.S10"));

    h.host.call("demo.S3", "run", vec![]).unwrap();
    assert_eq!(
        h.sink.records(),
        [TraceRecord::Stack {
            header: "{demo.S3.run} | INGRESS | STACK".to_string(),
            frames: vec!["demo.S3.run".to_string()],
        }]
    );
}

#[test]
fn already_loaded_units_are_instrumented_on_start() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CapturedTrace::new());
    let host = Arc::new(VirtualRuntime::new(sink.clone(), HeapDumper::new(dir.path(), 3)));
    host.define("demo.Shop", &bytes(SHOP)).unwrap();

    let h = start_with(config(dir.path(), &["demo.Shop::ping@EGRESS::RET"]), dir, host, sink);
    h.host.call("demo.Shop", "ping", vec![]).unwrap();
    assert_eq!(h.sink.lines(), ["{demo.Shop.ping} | EGRESS | RET | VOID"]);
}

#[test]
fn disabled_instrumentation_installs_nothing() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CapturedTrace::new());
    let host = Arc::new(VirtualRuntime::new(sink.clone(), HeapDumper::new(dir.path(), 3)));
    let mut cfg = config(dir.path(), &["demo.Shop::ping@EGRESS::RET"]);
    cfg.should_instrument = false;

    let h = start_with(cfg, dir, host, sink);
    assert!(h.engine.interceptor().is_none());
    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();
    h.host.call("demo.Shop", "ping", vec![]).unwrap();
    assert!(h.sink.records().is_empty());
}

fn write_rules(path: &Path, rules: &[&str], bump_secs: u64) {
    let mut yaml = String::from("traceFileLocation: /tmp/graft\nagentRules:\n");
    for rule in rules {
        yaml.push_str(&format!("  - \"{}\"\n", rule));
    }
    fs::write(path, yaml).unwrap();
    let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + bump_secs);
    fs::File::options().write(true).open(path).unwrap().set_modified(stamp).unwrap();
}

#[test]
fn reload_redelivers_only_affected_units() {
    let shop_rule = "demo.Shop::ping@EGRESS::RET";
    let cart_rule = "demo.Cart::ping@INGRESS::STACK";
    let h = start(&[shop_rule]);
    let path = h._dir.path().join("graft.yaml");
    write_rules(&path, &[shop_rule], 0);

    h.host.define("demo.Shop", &bytes(SHOP)).unwrap();
    h.host.define("demo.Cart", &bytes(&SHOP.replace("demo.Shop", "demo.Cart"))).unwrap();
    h.host.define("demo.Idle", &bytes(&SHOP.replace("demo.Shop", "demo.Idle"))).unwrap();

    let host: Arc<dyn HostRuntime> = h.host.clone();
    let icp = Arc::clone(h.engine.interceptor().unwrap());
    let mut ctl = ReloadController::new(RuleSource::new(&path), icp, host, Duration::from_secs(60));
    assert_eq!(ctl.tick(), TickOutcome::Unchanged);

    write_rules(&path, &[shop_rule, cart_rule], 10);
    let TickOutcome::Reloaded { affected, redelivered } = ctl.tick() else {
        panic!("expected reload")
    };
    assert_eq!(affected.into_iter().collect::<Vec<_>>(), ["demo.cart"]);
    assert_eq!(redelivered, ["demo.Cart"]);

    h.host.call("demo.Cart", "ping", vec![]).unwrap();
    assert!(matches!(
        h.sink.records().last(),
        Some(TraceRecord::Stack { header, .. }) if header == "{demo.Cart.ping} | INGRESS | STACK"
    ));

    // dropping the Shop rule restores Shop's pristine code
    write_rules(&path, &[cart_rule], 20);
    let TickOutcome::Reloaded { redelivered, .. } = ctl.tick() else {
        panic!("expected reload")
    };
    assert_eq!(redelivered, ["demo.Shop"]);
    h.sink.clear();
    h.host.call("demo.Shop", "ping", vec![]).unwrap();
    assert!(h.sink.records().is_empty());

    // a file with a malformed entry is rejected and the Cart rule stays
    write_rules(&path, &["demo.Cart::ping@NOWHERE::STACK"], 30);
    assert!(matches!(ctl.tick(), TickOutcome::Rejected { .. }));
    h.host.call("demo.Cart", "ping", vec![]).unwrap();
    assert_eq!(h.sink.records().len(), 1);
}
