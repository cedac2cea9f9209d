//! Run a few contract scripts in a V8 sandbox

#[cfg(feature = "v8")]
use cvm_sandbox::{ExecutionRequest, HostFunction, Sandbox, SandboxService, StaticResolver, V8Engine};

#[cfg(feature = "v8")]
const INJECT_GAS: &str = r#"
    globalThis.injectGas = (source) => "_native_gas(1); " + source;
"#;

#[cfg(feature = "v8")]
struct BlockHeight;

#[cfg(feature = "v8")]
impl HostFunction for BlockHeight {
    fn name(&self) -> &str {
        "blockHeight"
    }

    fn call(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, String> {
        Ok(serde_json::json!(1024))
    }
}

#[cfg(feature = "v8")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let engine = V8Engine::builder()
        .bootstrap("inject_gas.js", INJECT_GAS)
        .build()?;
    let sandbox = Sandbox::builder(engine)
        .fallback_resolver(StaticResolver::new().with_module("math", "({ square: x => x * x })"))
        .host_function(BlockHeight)
        .gas_limit(10_000)
        .build()?;
    let service = SandboxService::new(sandbox);

    println!("=== V8 Contract Sandbox ===\n");

    println!("Example 1: Simple expression");
    execute_and_print(&service, ExecutionRequest::new("1 + 1")).await?;

    println!("\nExample 2: Object result");
    execute_and_print(
        &service,
        ExecutionRequest::new(r#"({ name: "token", supply: 21e6, tags: ["fixed"] })"#),
    )
    .await?;

    println!("\nExample 3: Host function");
    execute_and_print(&service, ExecutionRequest::new("({ height: blockHeight() })")).await?;

    println!("\nExample 4: Metered require");
    execute_and_print(
        &service,
        ExecutionRequest::new("_native_require('math').square(12)"),
    )
    .await?;

    println!("\nExample 5: Out of gas");
    execute_and_print(
        &service,
        ExecutionRequest::new("for (;;) { _native_gas(100); }").with_gas_limit(1_000),
    )
    .await?;

    println!("\nExample 6: Uncaught exception");
    execute_and_print(&service, ExecutionRequest::new("throw new Error('Test error')")).await?;

    Ok(())
}

#[cfg(feature = "v8")]
async fn execute_and_print(
    service: &SandboxService<V8Engine>,
    request: ExecutionRequest,
) -> anyhow::Result<()> {
    let (id, result) = service.execute(request).await?;

    match (&result.value, &result.error) {
        (_, Some(error)) => {
            for line in error.lines() {
                eprintln!("  {line}");
            }
        }
        (Some(value), None) if result.is_json => println!("  json: {value}"),
        (Some(value), None) => println!("  value: {value}"),
        (None, None) => println!("  (no value)"),
    }
    println!("  [id={} gas_used={}]", id, result.gas_used);

    Ok(())
}

#[cfg(not(feature = "v8"))]
fn main() {
    eprintln!("This example requires the 'v8' feature.");
    eprintln!("Run with: cargo run --example v8_contract --features v8");
    std::process::exit(1);
}
