//! V8 engine backend using deno_core
//!
//! V8 isolates must stay on the thread that created them, so [`V8Engine`]
//! is a handle to a dedicated engine thread that owns the `JsRuntime`.
//! Engine calls travel over a channel and block on the reply; only
//! [`Interrupt::interrupt`] and [`Engine::clear_interrupt`] touch the
//! isolate directly, through its thread-safe handle.

mod isolate;
mod natives;
mod snapshot;

use isolate::{CoreOptions, EngineCore, Request};
use crate::engine::{Engine, Exception, Interrupt, ValueKind};
use crate::host::HostContext;
use crate::{Result, SandboxError};
use deno_core::v8;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

pub use snapshot::{SnapshotConfig, SnapshotManager};

/// Handle to a script compiled on the engine thread
#[derive(Debug)]
pub struct V8Script {
    id: u64,
}

/// A run result, materialised on the engine thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V8Value {
    kind: ValueKind,
    /// Display text for primitives, JSON for objects
    text: Option<String>,
}

struct V8Interrupt(v8::IsolateHandle);

impl Interrupt for V8Interrupt {
    fn interrupt(&self) {
        self.0.terminate_execution();
    }
}

/// JavaScript engine backed by a V8 isolate.
pub struct V8Engine {
    requests: Option<mpsc::Sender<Request>>,
    isolate: v8::IsolateHandle,
    thread: Option<JoinHandle<()>>,
}

impl V8Engine {
    /// Engine with no snapshot, no bootstrap scripts and the default heap
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> V8EngineBuilder {
        V8EngineBuilder::default()
    }

    fn spawn(options: CoreOptions) -> Result<Self> {
        let (requests, receiver) = mpsc::channel::<Request>();
        let (init_tx, init_rx) = mpsc::channel::<Result<v8::IsolateHandle>>();

        let thread = std::thread::Builder::new()
            .name("cvm-v8-engine".to_string())
            .spawn(move || {
                let mut core = match EngineCore::new(options) {
                    Ok(core) => core,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(core.isolate_handle()));
                core.serve(receiver);
            })?;

        let isolate = match init_rx.recv() {
            Ok(Ok(isolate)) => isolate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SandboxError::Engine(
                    "V8 engine thread exited during startup".to_string(),
                ));
            }
        };

        tracing::debug!("V8 engine started");
        Ok(Self {
            requests: Some(requests),
            isolate,
            thread: Some(thread),
        })
    }

    /// Send a request and wait for the engine thread to answer it
    fn call<T>(&self, request: impl FnOnce(mpsc::Sender<T>) -> Request) -> Option<T> {
        let (reply, response) = mpsc::channel();
        self.requests.as_ref()?.send(request(reply)).ok()?;
        response.recv().ok()
    }

    fn gone() -> Exception {
        Exception::thrown("Error: V8 engine thread is gone")
    }
}

impl Engine for V8Engine {
    type Script = V8Script;
    type Value = V8Value;

    fn install(&mut self, host: Arc<HostContext>) -> Result<()> {
        self.call(|reply| Request::Install { host, reply })
            .unwrap_or_else(|| Err(SandboxError::Engine("V8 engine thread is gone".to_string())))
    }

    fn compile(&mut self, source: &str, name: &str) -> std::result::Result<V8Script, Exception> {
        let id = self
            .call(|reply| Request::Compile {
                source: source.to_string(),
                name: name.to_string(),
                reply,
            })
            .unwrap_or_else(|| Err(Self::gone()))?;
        Ok(V8Script { id })
    }

    fn run(&mut self, script: V8Script) -> std::result::Result<V8Value, Exception> {
        self.call(|reply| Request::Run {
            script: script.id,
            reply,
        })
        .unwrap_or_else(|| Err(Self::gone()))
    }

    fn classify(&self, value: &V8Value) -> ValueKind {
        value.kind
    }

    fn display(&mut self, value: &V8Value) -> String {
        value.text.clone().unwrap_or_default()
    }

    fn stringify(&mut self, value: &V8Value) -> Option<String> {
        match value.kind {
            ValueKind::Object => value.text.clone(),
            _ => None,
        }
    }

    fn instrument(&mut self, source: &str) -> std::result::Result<String, Exception> {
        self.call(|reply| Request::Instrument {
            source: source.to_string(),
            reply,
        })
        .unwrap_or_else(|| Err(Self::gone()))
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        Arc::new(V8Interrupt(self.isolate.clone()))
    }

    fn clear_interrupt(&mut self) {
        self.isolate.cancel_terminate_execution();
    }
}

impl Drop for V8Engine {
    fn drop(&mut self) {
        self.isolate.terminate_execution();
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("V8 engine thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for V8Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V8Engine")
            .field("running", &self.requests.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`V8Engine`].
#[derive(Debug, Default)]
pub struct V8EngineBuilder {
    snapshot: Option<&'static [u8]>,
    max_heap_bytes: Option<usize>,
    bootstrap: Vec<(String, String)>,
}

impl V8EngineBuilder {
    /// Start from snapshot bytes that live for the rest of the process
    pub fn snapshot(mut self, snapshot: &'static [u8]) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Start from the snapshot file described by `config`. The file is read
    /// once; every builder using the same path shares the bytes.
    pub fn snapshot_file(mut self, config: SnapshotConfig) -> Result<Self> {
        self.snapshot = Some(SnapshotManager::new(config).load_static()?);
        Ok(self)
    }

    pub fn max_heap_bytes(mut self, bytes: Option<usize>) -> Self {
        self.max_heap_bytes = bytes;
        self
    }

    /// Script evaluated, in order, before the engine is handed out
    pub fn bootstrap(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.bootstrap.push((name.into(), source.into()));
        self
    }

    /// Read a bootstrap script from disk; it is evaluated under its file name
    pub fn bootstrap_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.bootstrap(name, source))
    }

    pub fn build(self) -> Result<V8Engine> {
        V8Engine::spawn(CoreOptions {
            snapshot: self.snapshot,
            max_heap_bytes: self.max_heap_bytes,
            bootstrap: self.bootstrap,
        })
    }
}
