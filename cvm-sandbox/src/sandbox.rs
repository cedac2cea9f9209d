//! Sandbox lifecycle.
//!
//! A [`Sandbox`] owns one engine, the per-sandbox host context (gas meter,
//! module loader, host functions) and the execution gate that keeps at most
//! one execution in flight. It is created once, reused for many
//! [`execute`](Sandbox::execute) calls and released explicitly or on drop.

use crate::diagnostic::format_exception;
use crate::engine::{Engine, Interrupt};
use crate::error::{Result, SandboxError};
use crate::gas::GasMeter;
use crate::host::{HostContext, HostFunction};
use crate::limits::ResourceLimits;
use crate::resolver::{ModuleResolver, NoFallback};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// A spawned execution worker that may still be running.
pub(crate) struct Retirement {
    pub(crate) done: mpsc::Receiver<()>,
    pub(crate) thread: JoinHandle<()>,
}

impl Retirement {
    /// Wait until the worker has exited or `deadline` passes.
    /// Returns `true` once the worker is gone.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let timeout = deadline.saturating_duration_since(Instant::now());
        !matches!(
            self.done.recv_timeout(timeout),
            Err(mpsc::RecvTimeoutError::Timeout)
        )
    }

    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!("Execution worker panicked");
        }
    }
}

/// Isolated execution context plus its configuration and gas accounting.
pub struct Sandbox<E: Engine> {
    pub(crate) engine: Arc<Mutex<E>>,
    pub(crate) interrupter: Arc<dyn Interrupt>,
    pub(crate) host: Arc<HostContext>,
    pub(crate) gas: Arc<GasMeter>,
    pub(crate) limits: ResourceLimits,
    /// Held for the duration of an `execute` call; remembers the last worker
    /// so the next call (or teardown) can wait for it to retire.
    pub(crate) gate: Mutex<Option<Retirement>>,
}

impl<E: Engine> Sandbox<E> {
    /// Take ownership of a ready engine with default configuration
    pub fn create(engine: E) -> Result<Self> {
        Self::builder(engine).build()
    }

    pub fn builder(engine: E) -> SandboxBuilder<E> {
        SandboxBuilder::new(engine)
    }

    pub fn module_path(&self) -> PathBuf {
        self.host.modules().module_path()
    }

    /// Directory searched first by `require`. Does not touch the engine.
    pub fn set_module_path(&self, path: impl AsRef<Path>) {
        self.host.modules().set_module_path(path);
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas.limit()
    }

    /// Gas budget for subsequent executions. Does not touch the engine.
    pub fn set_gas_limit(&self, limit: u64) {
        self.gas.set_limit(limit);
    }

    /// Gas consumed by the current or most recent execution
    pub fn gas_used(&self) -> u64 {
        self.gas.used()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Run the gas-injection transform over `code` inside the engine and
    /// return the instrumented source.
    pub fn compile(&self, code: &str) -> Result<String> {
        let mut gate = self.gate.lock();
        if let Some(previous) = gate.take() {
            previous.join();
        }

        let mut engine = self.engine.lock();
        engine.clear_interrupt();
        engine
            .instrument(code)
            .map_err(|e| SandboxError::Compile(format_exception(&e)))
    }

    /// Tear the sandbox down. Waits for any worker still finishing a
    /// cancelled run before the engine is released.
    pub fn release(self) {
        drop(self);
    }

    /// Release the sandbox held in `slot`, if any. Calling it again on the
    /// emptied slot is a no-op.
    pub fn release_slot(slot: &mut Option<Self>) {
        if let Some(sandbox) = slot.take() {
            sandbox.release();
        }
    }
}

impl<E: Engine> Drop for Sandbox<E> {
    fn drop(&mut self) {
        if let Some(worker) = self.gate.get_mut().take() {
            self.interrupter.interrupt();
            worker.join();
        }
        tracing::debug!("Sandbox released");
    }
}

impl<E: Engine> std::fmt::Debug for Sandbox<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("host", &self.host)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Sandbox`].
///
/// The capability list is applied uniformly when the sandbox is built.
pub struct SandboxBuilder<E: Engine> {
    engine: E,
    fallback: Arc<dyn ModuleResolver>,
    functions: Vec<Arc<dyn HostFunction>>,
    limits: ResourceLimits,
    module_path: Option<PathBuf>,
    gas_limit: u64,
}

impl<E: Engine> SandboxBuilder<E> {
    fn new(engine: E) -> Self {
        Self {
            engine,
            fallback: Arc::new(NoFallback),
            functions: Vec::new(),
            limits: ResourceLimits::default(),
            module_path: None,
            gas_limit: 0,
        }
    }

    /// Resolver consulted when a module is not on the module path
    pub fn fallback_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.fallback = Arc::new(resolver);
        self
    }

    /// Register a domain host function
    pub fn host_function(mut self, function: impl HostFunction + 'static) -> Self {
        self.functions.push(Arc::new(function));
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = limit;
        self
    }

    pub fn build(self) -> Result<Sandbox<E>> {
        let gas = Arc::new(GasMeter::new());
        gas.set_limit(self.gas_limit);

        let host = Arc::new(HostContext::new(
            Arc::clone(&gas),
            self.fallback,
            self.functions,
        ));
        if let Some(path) = &self.module_path {
            host.modules().set_module_path(path);
        }

        let mut engine = self.engine;
        engine.install(Arc::clone(&host))?;
        let interrupter = engine.interrupter();

        tracing::debug!(
            module_path = %host.modules().module_path().display(),
            gas_limit = self.gas_limit,
            "Sandbox created"
        );

        Ok(Sandbox {
            engine: Arc::new(Mutex::new(engine)),
            interrupter,
            host,
            gas,
            limits: self.limits,
            gate: Mutex::new(None),
        })
    }
}
