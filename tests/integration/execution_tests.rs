//! Execution controller behaviour through the public sandbox API

use crate::common::{
    deadline_in, far_deadline, scripted_sandbox, scripted_sandbox_with_limit, setup_test_logging,
};
use assert_matches::assert_matches;
use cvm_sandbox::DEFAULT_SCRIPT_NAME;
use std::time::{Duration, Instant};

#[test]
fn test_primitive_result() {
    setup_test_logging();
    let result = scripted_sandbox().execute("gas 2\nvalue 2", far_deadline());

    assert_eq!(result.value.as_deref(), Some("2"));
    assert!(!result.is_json);
    assert!(result.error.is_none());
    assert_eq!(result.gas_used, 2);
}

#[test]
fn test_object_result_is_json() {
    let result = scripted_sandbox().execute(r#"json {"a":1}"#, far_deadline());

    assert_eq!(result.value.as_deref(), Some(r#"{"a":1}"#));
    assert!(result.is_json);
    assert!(result.error.is_none());
}

#[test]
fn test_unserializable_object_completes_without_value() {
    let result = scripted_sandbox().execute("unserializable", far_deadline());

    assert!(result.success());
    assert!(result.value.is_none());
    assert!(!result.is_json);
}

#[test]
fn test_empty_result_is_success() {
    let result = scripted_sandbox().execute("value 1\nempty", far_deadline());

    assert!(result.success());
    assert!(result.value.is_none());
    assert!(result.error.is_none());
}

#[test]
fn test_syntax_error_names_the_script() {
    let result = scripted_sandbox().execute("value 1\nsyntax ((", far_deadline());

    let error = result.error.expect("syntax error should be reported");
    assert!(error.starts_with("Uncaught exception: SyntaxError"), "{error}");
    assert!(error.contains(DEFAULT_SCRIPT_NAME), "{error}");
    assert!(error.contains("syntax (("), "{error}");
    assert!(result.value.is_none());
}

#[test]
fn test_thrown_exception_report() {
    let result = scripted_sandbox().execute("value 1\nthrow boom", far_deadline());

    let error = result.error.unwrap();
    let lines: Vec<&str> = error.lines().collect();
    assert_eq!(lines[0], "Uncaught exception: Error: boom");
    assert_eq!(lines[1], format!("at {DEFAULT_SCRIPT_NAME}:2:0"));
    assert_eq!(lines[2], "  throw boom");
    assert_eq!(lines[3], "  ^^^^^^^^^^");
    assert_eq!(lines[4], "Stack trace:");
}

#[test]
fn test_deadline_now_kills_unbounded_loop() {
    let sandbox = scripted_sandbox();
    let deadline = Instant::now();
    let result = sandbox.execute("gas 9\nspin", deadline);

    let error = result.error.unwrap();
    assert!(error.starts_with("execution killed"), "{error}");
    assert!(result.value.is_none());
    assert!(deadline.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_timeout_reports_live_gas_counter() {
    let sandbox = scripted_sandbox();
    let result = sandbox.execute("gas 9\nspin", deadline_in(50));

    assert!(result.error.unwrap().starts_with("execution killed"));
    assert_eq!(result.gas_used, 9);
    assert_eq!(sandbox.gas_used(), 9);
}

#[test]
fn test_gas_exceeded_before_completion() {
    let sandbox = scripted_sandbox_with_limit(10);
    let result = sandbox.execute("gas 11\nsleep 200\nvalue late", far_deadline());

    assert_eq!(
        result.error.as_deref(),
        Some("out of gas: used 11, limit 10")
    );
    assert_eq!(result.gas_used, 11);
    assert!(result.value.is_none());
}

#[test]
fn test_zero_gas_limit_fails_any_metered_run() {
    let sandbox = scripted_sandbox_with_limit(0);
    let result = sandbox.execute("gas 1\nspin", far_deadline());
    assert_matches!(result.error.as_deref(), Some(e) if e.starts_with("out of gas"));
}

#[test]
fn test_gas_resets_per_execution() {
    let sandbox = scripted_sandbox_with_limit(10);

    let first = sandbox.execute("gas 6\nvalue a", far_deadline());
    assert_eq!(first.gas_used, 6);

    let second = sandbox.execute("gas 6\nvalue b", far_deadline());
    assert_eq!(second.value.as_deref(), Some("b"));
    assert_eq!(second.gas_used, 6);
}

#[test]
fn test_next_execution_waits_for_killed_worker() {
    let sandbox = scripted_sandbox();

    // The worker ignores interrupts while sleeping, so it outlives this call
    let result = sandbox.execute("sleep 100\nvalue stale", deadline_in(10));
    assert!(result.error.unwrap().starts_with("execution killed"));

    let result = sandbox.execute("value fresh", far_deadline());
    assert_eq!(result.value.as_deref(), Some("fresh"));
}

#[test]
fn test_unretired_worker_blocks_short_deadline() {
    let sandbox = scripted_sandbox();

    let result = sandbox.execute("sleep 300", deadline_in(5));
    assert!(result.error.is_some());

    // Previous worker is still sleeping past this deadline
    let result = sandbox.execute("value never", deadline_in(20));
    assert_matches!(result.error.as_deref(), Some(e) if e.starts_with("execution killed"));

    let result = sandbox.execute("value later", far_deadline());
    assert_eq!(result.value.as_deref(), Some("later"));
}

#[test]
fn test_compile_instruments_source() {
    let sandbox = scripted_sandbox();
    let instrumented = sandbox.compile("value 1\nempty").unwrap();
    assert_eq!(instrumented, "gas 1\nvalue 1\ngas 1\nempty\n");

    let result = sandbox.execute(&instrumented, far_deadline());
    assert_eq!(result.gas_used, 2);
    assert!(result.success());
}

#[test]
fn test_late_charge_from_killed_worker_is_not_billed_to_next_run() {
    let sandbox = scripted_sandbox();

    let result = sandbox.execute("slowgas 100 7", deadline_in(10));
    assert!(result.error.unwrap().starts_with("execution killed"));
    assert_eq!(result.gas_used, 0);

    // Waits for the killed worker, whose charge lands during the wait
    let result = sandbox.execute("gas 2\nvalue fresh", far_deadline());
    assert_eq!(result.value.as_deref(), Some("fresh"));
    assert_eq!(result.gas_used, 2);
    assert_eq!(sandbox.gas_used(), 2);
}

#[test]
fn test_refused_start_reports_no_gas() {
    let sandbox = scripted_sandbox();

    let result = sandbox.execute("gas 4\nsleep 300", deadline_in(20));
    assert!(result.error.is_some());
    assert_eq!(result.gas_used, 4);

    let result = sandbox.execute("value never", deadline_in(10));
    assert!(result.error.unwrap().starts_with("execution killed"));
    assert_eq!(result.gas_used, 0);
}
