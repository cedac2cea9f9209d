//! `require` resolution through a running sandbox

use crate::common::far_deadline;
use cvm_sandbox::testing::ScriptedEngine;
use cvm_sandbox::{HostFunction, Sandbox, StaticResolver};
use serde_json::{json, Value};

fn sandbox_with(resolver: StaticResolver) -> Sandbox<ScriptedEngine> {
    Sandbox::builder(ScriptedEngine::new())
        .fallback_resolver(resolver)
        .gas_limit(1_000)
        .build()
        .unwrap()
}

#[test]
fn test_local_module_returned_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("token.js"), "exports.name = 'token';").unwrap();

    let sandbox = sandbox_with(StaticResolver::new());
    sandbox.set_module_path(dir.path());

    let result = sandbox.execute("require token", far_deadline());
    assert_eq!(result.value.as_deref(), Some("exports.name = 'token';"));
    assert_eq!(result.gas_used, 0);
}

#[test]
fn test_local_module_wins_over_fallback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("math.js"), "local").unwrap();

    let sandbox = sandbox_with(StaticResolver::new().with_module("math", "value fallback"));
    sandbox.set_module_path(dir.path());

    let result = sandbox.execute("require math", far_deadline());
    assert_eq!(result.value.as_deref(), Some("local"));
}

#[test]
fn test_empty_local_file_falls_through() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("math.js"), "").unwrap();

    let sandbox = sandbox_with(StaticResolver::new().with_module("math", "value fallback"));
    sandbox.set_module_path(dir.path());

    let result = sandbox.execute("require math", far_deadline());
    assert_eq!(result.value.as_deref(), Some("fallback"));
}

#[test]
fn test_fallback_module_is_metered() {
    let sandbox = sandbox_with(
        StaticResolver::new().with_module("lib", "gas 5\nvalue from-lib"),
    );

    let result = sandbox.execute("require lib", far_deadline());
    assert_eq!(result.value.as_deref(), Some("from-lib"));
    // Two injected charges plus the module's own
    assert_eq!(result.gas_used, 7);
}

#[test]
fn test_fallback_module_counts_against_limit() {
    let sandbox = sandbox_with(StaticResolver::new().with_module("heavy", "gas 2000\nspin"));

    let result = sandbox.execute("require heavy", far_deadline());
    assert!(result.error.unwrap().starts_with("out of gas"));
}

#[test]
fn test_missing_module_throws() {
    let sandbox = sandbox_with(StaticResolver::new());

    let result = sandbox.execute("require nowhere", far_deadline());
    let error = result.error.unwrap();
    assert!(error.contains("module 'nowhere' not found"), "{error}");
    assert!(error.contains("require nowhere"), "{error}");
}

#[test]
fn test_closure_resolver() {
    let sandbox = Sandbox::builder(ScriptedEngine::new())
        .fallback_resolver(|module: &str| Some(format!("value resolved:{module}")))
        .gas_limit(100)
        .build()
        .unwrap();

    let result = sandbox.execute("require anything", far_deadline());
    assert_eq!(result.value.as_deref(), Some("resolved:anything"));
}

#[test]
fn test_broken_fallback_module_reports_syntax_error() {
    let sandbox = sandbox_with(StaticResolver::new().with_module("bad", "nonsense here"));

    let result = sandbox.execute("require bad", far_deadline());
    let error = result.error.unwrap();
    assert!(error.contains("SyntaxError"), "{error}");
}

struct Balance;

impl HostFunction for Balance {
    fn name(&self) -> &str {
        "balanceOf"
    }

    fn call(&self, args: &[Value]) -> Result<Value, String> {
        match args.first().and_then(Value::as_str) {
            Some("alice") => Ok(json!({ "balance": 42 })),
            Some(other) => Err(format!("unknown account {other}")),
            None => Err("balanceOf expects an account".to_string()),
        }
    }
}

#[test]
fn test_host_function_roundtrip() {
    let sandbox = Sandbox::builder(ScriptedEngine::new())
        .host_function(Balance)
        .gas_limit(100)
        .build()
        .unwrap();

    let result = sandbox.execute(r#"call balanceOf ["alice"]"#, far_deadline());
    assert!(result.is_json);
    let value: Value = serde_json::from_str(result.value.as_deref().unwrap()).unwrap();
    assert_eq!(value, json!({ "balance": 42 }));

    let result = sandbox.execute(r#"call balanceOf ["bob"]"#, far_deadline());
    assert!(result.error.unwrap().contains("unknown account bob"));
}

#[test]
fn test_unregistered_host_function() {
    let sandbox = sandbox_with(StaticResolver::new());
    let result = sandbox.execute("call transfer [1]", far_deadline());
    assert!(result
        .error
        .unwrap()
        .contains("host function 'transfer' is not registered"));
}

#[test]
fn test_require_cannot_leave_module_path() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.js"), "host secret").unwrap();
    let module_dir = tempfile::tempdir().unwrap();

    let sandbox = sandbox_with(StaticResolver::new());
    sandbox.set_module_path(module_dir.path());

    let absolute = outside.path().join("secret");
    let result = sandbox.execute(&format!("require {}", absolute.display()), far_deadline());
    let error = result.error.unwrap();
    assert!(error.contains("outside the module path"), "{error}");
    assert!(result.value.is_none());
}
