//! Sandbox creation, configuration and teardown

use crate::common::{deadline_in, far_deadline, scripted_sandbox};
use cvm_sandbox::testing::ScriptedEngine;
use cvm_sandbox::{Sandbox, DEFAULT_MODULE_PATH};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[test]
fn test_create_uses_defaults() {
    let sandbox = Sandbox::create(ScriptedEngine::new()).unwrap();

    assert_eq!(sandbox.module_path(), PathBuf::from(DEFAULT_MODULE_PATH));
    assert_eq!(sandbox.gas_limit(), 0);
    assert_eq!(sandbox.gas_used(), 0);
}

#[test]
fn test_setters_do_not_touch_engine() {
    let engine = ScriptedEngine::new();
    let runs = engine.run_counter();
    let sandbox = Sandbox::create(engine).unwrap();

    sandbox.set_module_path("/srv/contracts/lib");
    sandbox.set_gas_limit(500);

    assert_eq!(sandbox.module_path(), PathBuf::from("/srv/contracts/lib"));
    assert_eq!(sandbox.gas_limit(), 500);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_many_executions_on_one_sandbox() {
    let engine = ScriptedEngine::new();
    let runs = engine.run_counter();
    let sandbox = Sandbox::builder(engine).gas_limit(100).build().unwrap();

    for i in 0..5 {
        let result = sandbox.execute(&format!("gas 10\nvalue {i}"), far_deadline());
        assert_eq!(result.value, Some(i.to_string()));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 5);
}

#[test]
fn test_empty_code_is_rejected() {
    let engine = ScriptedEngine::new();
    let runs = engine.run_counter();
    let sandbox = Sandbox::builder(engine).gas_limit(10).build().unwrap();

    let result = sandbox.execute("  \n ", far_deadline());
    assert_eq!(result.error.as_deref(), Some("empty script"));
    assert_eq!(result.gas_used, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_release_drops_engine() {
    let engine = ScriptedEngine::new();
    let dropped = engine.dropped_flag();
    let sandbox = Sandbox::create(engine).unwrap();

    sandbox.release();
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_release_slot_twice_is_noop() {
    let engine = ScriptedEngine::new();
    let dropped = engine.dropped_flag();
    let mut slot = Some(Sandbox::create(engine).unwrap());

    Sandbox::release_slot(&mut slot);
    assert!(slot.is_none());
    assert!(dropped.load(Ordering::SeqCst));

    Sandbox::release_slot(&mut slot);
    assert!(slot.is_none());
}

#[test]
fn test_release_after_timeout_waits_for_worker() {
    let engine = ScriptedEngine::new();
    let dropped = engine.dropped_flag();
    let sandbox = Sandbox::builder(engine).gas_limit(10).build().unwrap();

    let started = Instant::now();
    let result = sandbox.execute("sleep 150\nvalue late", deadline_in(10));
    assert!(result.error.unwrap().starts_with("execution killed"));
    assert!(!dropped.load(Ordering::SeqCst));

    sandbox.release();
    assert!(dropped.load(Ordering::SeqCst));
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[test]
fn test_release_interrupts_spinning_worker() {
    let sandbox = scripted_sandbox();
    let result = sandbox.execute("spin", deadline_in(5));
    assert!(result.error.is_some());

    let started = Instant::now();
    drop(sandbox);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_compile_does_not_run_or_charge() {
    let engine = ScriptedEngine::new();
    let runs = engine.run_counter();
    let sandbox = Sandbox::builder(engine).gas_limit(10).build().unwrap();

    let out = sandbox.compile("value 1").unwrap();
    assert_eq!(out, "gas 1\nvalue 1\n");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(sandbox.gas_used(), 0);
}

#[test]
fn test_sandbox_is_shareable_across_threads() {
    let sandbox = std::sync::Arc::new(scripted_sandbox());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let sandbox = std::sync::Arc::clone(&sandbox);
            std::thread::spawn(move || sandbox.execute(&format!("value {i}"), far_deadline()))
        })
        .collect();

    let mut values: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().unwrap().value.unwrap())
        .collect();
    values.sort();
    assert_eq!(values, vec!["0", "1", "2", "3"]);
}
