//! Engine abstraction: the narrow contract the sandbox needs from a script engine

use crate::host::HostContext;
use crate::Result;
use std::sync::Arc;

/// Where in the source an exception was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    /// Logical resource (file) name the script was compiled under
    pub resource: String,
    /// 1-based line number
    pub line: Option<usize>,
    /// 0-based column where the offending span starts
    pub start_column: Option<usize>,
    /// 0-based column where the offending span ends (exclusive)
    pub end_column: Option<usize>,
    /// Text of the offending line
    pub source_line: Option<String>,
}

/// How an engine call ended abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// The script (or compiler) raised an exception
    Thrown,
    /// The run was stopped by [`Interrupt::interrupt`]
    Terminated,
}

/// Raw diagnostic material captured from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: ExceptionKind,
    /// Textual form of the thrown value
    pub text: String,
    pub location: Option<SourceLocation>,
    pub stack: Option<String>,
}

impl Exception {
    /// A thrown exception with no location metadata
    pub fn thrown(text: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::Thrown,
            text: text.into(),
            location: None,
            stack: None,
        }
    }

    /// The marker for a run stopped by an interrupt
    pub fn terminated() -> Self {
        Self {
            kind: ExceptionKind::Terminated,
            text: String::new(),
            location: None,
            stack: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn is_terminated(&self) -> bool {
        self.kind == ExceptionKind::Terminated
    }
}

/// Shape of a value returned by [`Engine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `undefined` or nothing at all
    Empty,
    /// string, number or boolean
    Primitive,
    /// anything object-like
    Object,
}

/// Thread-safe handle that asks an in-flight run to stop.
///
/// Best-effort and asynchronous: the run stops at the engine's next safe
/// point. Calling it while nothing runs leaves a pending request that the
/// next run observes until [`Engine::clear_interrupt`] is called.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// An isolated execution environment, exclusively owned by one sandbox.
///
/// All methods except the [`Interrupt`] handle are called with the engine
/// locked, so at most one logical run is active at a time.
pub trait Engine: Send + 'static {
    /// A compiled unit, ready to run
    type Script: Send;
    /// A value produced by a run
    type Value: Send;

    /// Register the host capabilities (log, run, require, gas accounting and
    /// domain host functions) into the global scope. Called once, at sandbox
    /// creation, before any user code runs.
    fn install(&mut self, host: Arc<HostContext>) -> Result<()>;

    /// Compile `source` under the logical resource name `name`
    fn compile(&mut self, source: &str, name: &str) -> std::result::Result<Self::Script, Exception>;

    /// Run a compiled unit in the engine's global context
    fn run(&mut self, script: Self::Script) -> std::result::Result<Self::Value, Exception>;

    fn classify(&self, value: &Self::Value) -> ValueKind;

    /// Textual form of a primitive value
    fn display(&mut self, value: &Self::Value) -> String;

    /// JSON text of an object value, `None` if it cannot be serialized
    fn stringify(&mut self, value: &Self::Value) -> Option<String>;

    /// Apply the gas-injection transform to `source`, inside the engine
    fn instrument(&mut self, source: &str) -> std::result::Result<String, Exception>;

    fn interrupter(&self) -> Arc<dyn Interrupt>;

    /// Drop any pending interrupt request
    fn clear_interrupt(&mut self);

    /// Source that loads the contract in `code` and calls `api` with `args`
    fn prepare(code: &str, api: &str, args: &[serde_json::Value]) -> String {
        crate::contract::call_source(code, api, args)
    }
}
