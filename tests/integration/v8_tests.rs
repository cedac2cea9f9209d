//! End-to-end runs against the V8 backend

use crate::common::{deadline_in, far_deadline, setup_test_logging};
use assert_matches::assert_matches;
use cvm_sandbox::{
    ExecutionRequest, Sandbox, SandboxError, SandboxPool, SandboxService, SnapshotConfig,
    StaticResolver, V8Engine,
};
use serde_json::json;
use std::time::{Duration, Instant};

const INJECT_GAS: &str = r#"
    globalThis.injectGas = (source) => "_native_gas(1); " + source;
"#;

fn v8_sandbox(gas_limit: u64) -> Sandbox<V8Engine> {
    let engine = V8Engine::builder()
        .bootstrap("inject_gas.js", INJECT_GAS)
        .build()
        .expect("Failed to start V8 engine");
    Sandbox::builder(engine)
        .gas_limit(gas_limit)
        .build()
        .expect("Failed to build V8 sandbox")
}

#[test]
fn test_v8_gas_from_native_calls() {
    setup_test_logging();
    let sandbox = v8_sandbox(100);

    let result = sandbox.execute("_native_gas(40); _native_gas(2); 'done'", far_deadline());
    assert_eq!(result.value.as_deref(), Some("done"));
    assert_eq!(result.gas_used, 42);

    let result = sandbox.execute("for (;;) { _native_gas(1); }", far_deadline());
    let error = result.error.unwrap();
    assert!(error.starts_with("out of gas"), "{error}");
    assert!(result.gas_used > 100);
}

#[test]
fn test_v8_deadline_then_reuse() {
    let sandbox = v8_sandbox(1_000);

    let started = Instant::now();
    let result = sandbox.execute("while (true) {}", deadline_in(50));
    assert!(result.error.unwrap().starts_with("execution killed"));
    assert!(started.elapsed() < Duration::from_secs(2));

    let result = sandbox.execute("[1, 2, 3].map(x => x * 2)", far_deadline());
    assert_eq!(result.value.as_deref(), Some("[2,4,6]"));
    assert!(result.is_json);
}

#[test]
fn test_v8_require_local_module() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("greeting.js"), "'hello ' + 'world'").unwrap();

    let sandbox = v8_sandbox(1_000);
    sandbox.set_module_path(dir.path());

    let result = sandbox.execute("_native_require('greeting')", far_deadline());
    assert_eq!(result.value.as_deref(), Some("'hello ' + 'world'"));
}

#[test]
fn test_v8_require_fallback_is_instrumented() {
    let engine = V8Engine::builder()
        .bootstrap("inject_gas.js", INJECT_GAS)
        .build()
        .unwrap();
    let sandbox = Sandbox::builder(engine)
        .fallback_resolver(StaticResolver::new().with_module("answer", "6 * 7"))
        .gas_limit(1_000)
        .build()
        .unwrap();

    let result = sandbox.execute("_native_require('answer')", far_deadline());
    assert_eq!(result.value.as_deref(), Some("42"));
    assert_eq!(result.gas_used, 1);
}

#[test]
fn test_v8_compile_without_injector_fails() {
    let sandbox = Sandbox::builder(V8Engine::new().unwrap())
        .gas_limit(10)
        .build()
        .unwrap();

    let err = sandbox.compile("1 + 1").unwrap_err();
    assert_matches!(err, SandboxError::Compile(report) if report.contains("injectGas"));
}

#[test]
fn test_v8_missing_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = V8Engine::builder().snapshot_file(SnapshotConfig::new(dir.path().join("none.bin")));
    assert!(result.is_err());
}

#[test]
fn test_v8_pool_gives_clean_globals() {
    let pool = SandboxPool::new(1, || Ok(v8_sandbox(1_000))).unwrap();

    {
        let sandbox = pool.checkout().unwrap();
        let result = sandbox.execute("globalThis.leak = 7; leak", far_deadline());
        assert_eq!(result.value.as_deref(), Some("7"));
    }

    let sandbox = pool.checkout().unwrap();
    let result = sandbox.execute("typeof leak", far_deadline());
    assert_eq!(result.value.as_deref(), Some("undefined"));
}

#[tokio::test]
async fn test_v8_service_execution() {
    let service = SandboxService::new(v8_sandbox(1_000));

    let request = ExecutionRequest::new("({ sum: [1, 2, 3].reduce((a, b) => a + b, 0) })")
        .with_timeout(Duration::from_secs(5));
    let (_, result) = service.execute(request).await.unwrap();
    assert_eq!(result.value.as_deref(), Some(r#"{"sum":6}"#));

    let request = ExecutionRequest::new("while (true) {}").with_timeout(Duration::from_millis(30));
    let (_, result) = service.execute(request).await.unwrap();
    assert!(result.error.unwrap().starts_with("execution killed"));
}

const COUNTER: &str = r#"
    var Counter = function () {};
    Counter.prototype = {
        add: function (a, b) {
            _native_gas(5);
            return a + b;
        }
    };
    module.exports = Counter;
"#;

#[test]
fn test_v8_pool_load_and_call() {
    let pool = SandboxPool::new(1, || Ok(v8_sandbox(1_000))).unwrap();

    let result = pool
        .load_and_call(COUNTER, "add", &[json!(2), json!(3)], far_deadline())
        .unwrap();
    assert_eq!(result.value.as_deref(), Some("5"));
    assert_eq!(result.gas_used, 5);
    assert_eq!(pool.idle(), 1);

    let result = pool
        .load_and_call(COUNTER, "sub", &[], far_deadline())
        .unwrap();
    assert!(result.error.unwrap().contains("contract has no api 'sub'"));
}
