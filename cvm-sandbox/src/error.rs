//! Sandbox error types.
//!
//! Every failure an execution can end in has a variant here. At the sandbox
//! boundary these are never returned as `Err`: the controller renders them
//! into [`ExecutionResult::error`](cvm_common::ExecutionResult) instead.

use std::time::Duration;

/// Unified error type for the contract sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Source text failed to compile. Carries the formatted diagnostic.
    #[error("{0}")]
    Compile(String),

    /// An exception was thrown while running. Carries the formatted diagnostic.
    #[error("{0}")]
    Runtime(String),

    /// The gas counter crossed the configured budget.
    #[error("out of gas: used {used}, limit {limit}")]
    GasExceeded {
        /// Counter value observed by the supervisor.
        used: u64,
        /// Configured budget.
        limit: u64,
    },

    /// The execution deadline passed before the script finished.
    #[error("execution killed: deadline exceeded by {overrun:?}")]
    TimedOut {
        /// How far past the deadline the supervisor noticed.
        overrun: Duration,
    },

    /// A `require` could not be satisfied locally or by the fallback resolver.
    #[error("require error: {0}")]
    Require(String),

    /// A native capability received an argument of the wrong shape.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine backend itself failed (e.g. its thread is gone).
    #[error("engine error: {0}")]
    Engine(String),

    /// An I/O error occurred (e.g. reading a module or snapshot from disk).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, SandboxError>;
