//! Execution controller: runs one script under a gas budget and a deadline.
//!
//! Each call spawns an execution worker that compiles and runs the script
//! with the engine locked, while the calling thread supervises. The
//! supervisor polls the shared [`ExecutionSlot`] and the gas meter, and on
//! budget or deadline overrun interrupts the engine and returns right away.
//! The worker is not joined there; the execution gate remembers it so the
//! next call, or the sandbox teardown, waits for it to retire.

use crate::diagnostic::format_exception;
use crate::engine::{Engine, Exception, ValueKind};
use crate::error::SandboxError;
use crate::sandbox::{Retirement, Sandbox};
use cvm_common::ExecutionResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

/// Logical file name user code is compiled under
pub const DEFAULT_SCRIPT_NAME: &str = "_default_name.js";

/// Terminal state of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Finished; `value` is `None` when the script produced nothing
    Succeeded { value: Option<String>, is_json: bool },
    /// Compile error or uncaught exception, already formatted
    Failed(String),
    GasExceeded { used: u64, limit: u64 },
    TimedOut { overrun: Duration },
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Succeeded { .. } => "succeeded",
            ExecutionOutcome::Failed(_) => "failed",
            ExecutionOutcome::GasExceeded { .. } => "gas_exceeded",
            ExecutionOutcome::TimedOut { .. } => "timed_out",
        }
    }

    pub fn into_result(self, gas_used: u64) -> ExecutionResult {
        match self {
            ExecutionOutcome::Succeeded {
                value: Some(value),
                is_json,
            } => ExecutionResult::value(value, is_json, gas_used),
            ExecutionOutcome::Succeeded { value: None, .. } => ExecutionResult::empty(gas_used),
            ExecutionOutcome::Failed(report) => ExecutionResult::failure(report, gas_used),
            ExecutionOutcome::GasExceeded { used, limit } => ExecutionResult::failure(
                SandboxError::GasExceeded { used, limit }.to_string(),
                gas_used,
            ),
            ExecutionOutcome::TimedOut { overrun } => ExecutionResult::failure(
                SandboxError::TimedOut { overrun }.to_string(),
                gas_used,
            ),
        }
    }
}

/// State shared between the worker and the supervisor for one call.
#[derive(Debug, Default)]
pub(crate) struct ExecutionSlot {
    error: Mutex<Option<String>>,
    value: Mutex<Option<(String, bool)>>,
    done: AtomicBool,
    cancelled: AtomicBool,
}

impl ExecutionSlot {
    fn fail(&self, exception: &Exception) {
        // A terminated run was cancelled by the supervisor, which has
        // already decided the outcome.
        if exception.is_terminated() {
            return;
        }
        *self.error.lock() = Some(format_exception(exception));
    }

    fn succeed(&self, value: String, is_json: bool) {
        *self.value.lock() = Some((value, is_json));
    }

    fn finish(&self) {
        self.done.store(true, Ordering::Release);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Body of the execution worker.
fn run_worker<E: Engine>(engine: &Mutex<E>, code: &str, slot: &ExecutionSlot) {
    let mut engine = engine.lock();

    // Clear before checking the flag: an interrupt issued after the check
    // stays pending and stops the run below.
    engine.clear_interrupt();
    if slot.is_cancelled() {
        tracing::debug!("Execution cancelled before it started");
        return;
    }

    let script = match engine.compile(code, DEFAULT_SCRIPT_NAME) {
        Ok(script) => script,
        Err(exception) => return slot.fail(&exception),
    };

    let value = match engine.run(script) {
        Ok(value) => value,
        Err(exception) => return slot.fail(&exception),
    };

    match engine.classify(&value) {
        ValueKind::Empty => slot.finish(),
        ValueKind::Primitive => {
            let text = engine.display(&value);
            slot.succeed(text, false);
        }
        ValueKind::Object => match engine.stringify(&value) {
            Some(json) => slot.succeed(json, true),
            None => slot.finish(),
        },
    }
}

impl<E: Engine> Sandbox<E> {
    /// Run `code` to completion, or until the gas budget or `deadline` is
    /// exceeded.
    ///
    /// Never fails at the call level: compile errors, exceptions and limit
    /// overruns all come back in [`ExecutionResult::error`]. The gas counter
    /// is reset at the start of each call.
    pub fn execute(&self, code: &str, deadline: Instant) -> ExecutionResult {
        let mut gate = self.gate.lock();

        if code.trim().is_empty() {
            return ExecutionResult::failure(
                SandboxError::Compile("empty script".to_string()).to_string(),
                0,
            );
        }

        if let Some(previous) = gate.take() {
            if !previous.wait_until(deadline) {
                tracing::warn!("Previous execution has not retired, refusing to start");
                *gate = Some(previous);
                let overrun = Instant::now().saturating_duration_since(deadline);
                return ExecutionOutcome::TimedOut { overrun }.into_result(0);
            }
            previous.join();
        }

        // After the previous worker is gone, so none of its charges land here
        self.gas.reset();

        let slot = Arc::new(ExecutionSlot::default());
        match self.spawn_worker(code, Arc::clone(&slot)) {
            Ok(worker) => *gate = Some(worker),
            Err(e) => {
                return ExecutionResult::failure(
                    SandboxError::Engine(format!("failed to spawn execution worker: {e}"))
                        .to_string(),
                    self.gas.used(),
                )
            }
        }

        let (outcome, gas_used) = self.supervise(&slot, deadline);
        tracing::info!(
            outcome = outcome.label(),
            gas_used,
            gas_limit = self.gas.limit(),
            "Execution finished"
        );
        outcome.into_result(gas_used)
    }

    fn spawn_worker(&self, code: &str, slot: Arc<ExecutionSlot>) -> std::io::Result<Retirement> {
        let engine = Arc::clone(&self.engine);
        let code = code.to_string();
        let (done_tx, done) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("cvm-exec-worker".to_string())
            .spawn(move || {
                run_worker(&engine, &code, &slot);
                let _ = done_tx.send(());
            })?;

        Ok(Retirement { done, thread })
    }

    /// Poll until an outcome is decided. Returns it with the gas counter
    /// snapshot taken at that moment.
    fn supervise(&self, slot: &ExecutionSlot, deadline: Instant) -> (ExecutionOutcome, u64) {
        loop {
            if let Some(decided) = self.check(slot, deadline) {
                return decided;
            }
            std::thread::sleep(self.limits.poll_interval);
        }
    }

    /// One supervisor check, in priority order: error, value, done, gas,
    /// deadline. Completion always wins over a simultaneous overrun.
    pub(crate) fn check(
        &self,
        slot: &ExecutionSlot,
        deadline: Instant,
    ) -> Option<(ExecutionOutcome, u64)> {
        if let Some(report) = slot.error.lock().take() {
            return Some((ExecutionOutcome::Failed(report), self.gas.used()));
        }

        if let Some((value, is_json)) = slot.value.lock().take() {
            return Some((
                ExecutionOutcome::Succeeded {
                    value: Some(value),
                    is_json,
                },
                self.gas.used(),
            ));
        }

        if slot.done.load(Ordering::Acquire) {
            return Some((
                ExecutionOutcome::Succeeded {
                    value: None,
                    is_json: false,
                },
                self.gas.used(),
            ));
        }

        if self.gas.exceeded() {
            let used = self.gas.used();
            let limit = self.gas.limit();
            self.abort(slot);
            return Some((ExecutionOutcome::GasExceeded { used, limit }, used));
        }

        let now = Instant::now();
        if now > deadline {
            self.abort(slot);
            return Some((
                ExecutionOutcome::TimedOut {
                    overrun: now - deadline,
                },
                self.gas.used(),
            ));
        }

        None
    }

    fn abort(&self, slot: &ExecutionSlot) {
        slot.cancel();
        self.interrupter.interrupt();
    }
}
