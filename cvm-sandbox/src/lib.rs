//! CVM Sandbox - gas-metered, deadline-bounded script execution
//!
//! A [`Sandbox`] wraps one isolated engine context. [`Sandbox::execute`]
//! runs a script on a worker thread while the caller supervises it,
//! interrupting the engine when the gas budget or the deadline is exceeded.
//! The engine itself sits behind the [`Engine`] trait; the V8 backend is
//! available with the `v8` feature.

mod contract;
mod controller;
mod diagnostic;
mod engine;
mod error;
mod gas;
mod host;
mod limits;
mod pool;
mod resolver;
mod sandbox;
mod service;

#[cfg(feature = "v8")]
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use contract::call_source;
pub use controller::{ExecutionOutcome, DEFAULT_SCRIPT_NAME};
pub use diagnostic::format_exception;
pub use engine::{Engine, Exception, ExceptionKind, Interrupt, SourceLocation, ValueKind};
pub use error::{Result, SandboxError};
pub use gas::GasMeter;
pub use host::{HostContext, HostFunction, NATIVE_GAS, NATIVE_LOG, NATIVE_REQUIRE, NATIVE_RUN};
pub use limits::ResourceLimits;
pub use pool::{PooledSandbox, SandboxPool};
pub use resolver::{
    ModuleLoader, ModuleResolver, ModuleSource, NoFallback, StaticResolver, DEFAULT_MODULE_PATH,
};
#[cfg(feature = "v8")]
pub use runtime::{SnapshotConfig, SnapshotManager, V8Engine, V8EngineBuilder};
pub use sandbox::{Sandbox, SandboxBuilder};
pub use service::{ExecutionId, ExecutionRecord, ExecutionStatus, SandboxService};

pub use cvm_common::{ExecutionRequest, ExecutionResult};
