//! Deadline enforcement against the V8 backend

#[cfg(feature = "v8")]
use cvm_sandbox::{ResourceLimits, Sandbox, V8Engine};
#[cfg(feature = "v8")]
use std::time::{Duration, Instant};

#[cfg(feature = "v8")]
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== V8 Deadline Test ===\n");

    let limits = ResourceLimits::default().with_max_heap_bytes(Some(100 * 1024 * 1024));
    let engine = V8Engine::builder()
        .max_heap_bytes(limits.max_heap_bytes)
        .build()?;
    let sandbox = Sandbox::builder(engine)
        .limits(limits)
        .gas_limit(u64::MAX)
        .build()?;

    println!("1. Code that finishes well inside its deadline:");
    let started = Instant::now();
    let result = sandbox.execute(
        r#"
        let sum = 0;
        for (let i = 0; i < 1000; i++) {
            sum += i;
        }
        sum
        "#,
        started + Duration::from_secs(2),
    );
    println!(
        "   value={:?} error={:?} elapsed={:?}",
        result.value,
        result.error,
        started.elapsed()
    );

    println!("\n2. Infinite loop with a 500ms deadline:");
    let started = Instant::now();
    let result = sandbox.execute("while (true) {}", started + Duration::from_millis(500));
    println!(
        "   error={:?} elapsed={:?}",
        result.error,
        started.elapsed()
    );

    println!("\n3. Same sandbox, next script:");
    let started = Instant::now();
    let result = sandbox.execute("'still alive'", started + Duration::from_secs(1));
    println!(
        "   value={:?} elapsed={:?}",
        result.value,
        started.elapsed()
    );

    sandbox.release();
    Ok(())
}

#[cfg(not(feature = "v8"))]
fn main() {
    eprintln!("This example requires the 'v8' feature.");
    eprintln!("Run with: cargo run --example v8_timeout --features v8");
    std::process::exit(1);
}
