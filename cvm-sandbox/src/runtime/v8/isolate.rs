//! The engine thread: owns the `JsRuntime` and serves requests sequentially.

use super::natives;
use super::V8Value;
use crate::engine::{Exception, SourceLocation, ValueKind};
use crate::host::{HostContext, NATIVE_GAS, NATIVE_LOG, NATIVE_REQUIRE, NATIVE_RUN};
use crate::{format_exception, Result, SandboxError};
use deno_core::{v8, JsRuntime, RuntimeOptions};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

/// Requests sent to the engine thread.
pub(super) enum Request {
    Install {
        host: Arc<HostContext>,
        reply: Sender<Result<()>>,
    },
    Compile {
        source: String,
        name: String,
        reply: Sender<std::result::Result<u64, Exception>>,
    },
    Run {
        script: u64,
        reply: Sender<std::result::Result<V8Value, Exception>>,
    },
    Instrument {
        source: String,
        reply: Sender<std::result::Result<String, Exception>>,
    },
}

/// Options the engine thread is started with.
pub(super) struct CoreOptions {
    pub snapshot: Option<&'static [u8]>,
    pub max_heap_bytes: Option<usize>,
    pub bootstrap: Vec<(String, String)>,
}

pub(super) struct EngineCore {
    runtime: JsRuntime,
    scripts: HashMap<u64, v8::Global<v8::Script>>,
    next_script: u64,
    heap_exhausted: Rc<Cell<bool>>,
    max_heap_bytes: Option<usize>,
}

impl EngineCore {
    pub(super) fn new(options: CoreOptions) -> Result<Self> {
        let CoreOptions {
            snapshot,
            max_heap_bytes,
            bootstrap,
        } = options;

        let create_params = max_heap_bytes.map(|max| {
            let initial = (max / 10).min(10 * 1024 * 1024);
            v8::CreateParams::default().heap_limits(initial, max)
        });

        let mut runtime = JsRuntime::new(RuntimeOptions {
            startup_snapshot: snapshot.map(|s| s.into()),
            create_params,
            ..Default::default()
        });

        // Terminate instead of aborting the process when the heap fills up.
        let heap_exhausted = Rc::new(Cell::new(false));
        if max_heap_bytes.is_some() {
            let handle = runtime.v8_isolate().thread_safe_handle();
            let flag = Rc::clone(&heap_exhausted);
            runtime.add_near_heap_limit_callback(move |current, _initial| {
                flag.set(true);
                handle.terminate_execution();
                current + 1024 * 1024
            });
        }

        let mut core = Self {
            runtime,
            scripts: HashMap::new(),
            next_script: 0,
            heap_exhausted,
            max_heap_bytes,
        };

        core.register_natives()?;
        for (name, source) in &bootstrap {
            core.evaluate(source, name).map_err(|e| {
                SandboxError::Compile(format!(
                    "bootstrap script {name} failed: {}",
                    format_exception(&e)
                ))
            })?;
            tracing::debug!(script = %name, "Bootstrap script evaluated");
        }

        Ok(core)
    }

    pub(super) fn isolate_handle(&mut self) -> v8::IsolateHandle {
        self.runtime.v8_isolate().thread_safe_handle()
    }

    pub(super) fn serve(&mut self, requests: Receiver<Request>) {
        while let Ok(request) = requests.recv() {
            match request {
                Request::Install { host, reply } => {
                    let _ = reply.send(self.install(host));
                }
                Request::Compile {
                    source,
                    name,
                    reply,
                } => {
                    let _ = reply.send(self.compile(&source, &name));
                }
                Request::Run { script, reply } => {
                    let _ = reply.send(self.run(script));
                }
                Request::Instrument { source, reply } => {
                    let _ = reply.send(self.instrument(&source));
                }
            }
        }
        tracing::debug!(scripts = self.scripts.len(), "V8 engine thread exiting");
    }

    fn register_natives(&mut self) -> Result<()> {
        let scope = &mut self.runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);

        natives::register(scope, global, NATIVE_LOG, natives::log)?;
        natives::register(scope, global, NATIVE_RUN, natives::run)?;
        natives::register(scope, global, NATIVE_REQUIRE, natives::require)?;
        natives::register(scope, global, NATIVE_GAS, natives::gas)?;
        Ok(())
    }

    fn install(&mut self, host: Arc<HostContext>) -> Result<()> {
        let names: Vec<String> = host.function_names().map(str::to_string).collect();
        self.runtime.v8_isolate().set_slot(host);

        let scope = &mut self.runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);
        for name in &names {
            natives::register_host_function(scope, global, name)?;
        }

        tracing::debug!(host_functions = names.len(), "Host capabilities installed");
        Ok(())
    }

    fn compile(&mut self, source: &str, name: &str) -> std::result::Result<u64, Exception> {
        let script = {
            let scope = &mut self.runtime.handle_scope();
            let tc = &mut v8::TryCatch::new(scope);
            match natives::compile_script(tc, source, name) {
                Some(script) => v8::Global::new(tc, script),
                None => return Err(capture(tc, &self.heap_exhausted, self.max_heap_bytes)),
            }
        };

        self.next_script += 1;
        self.scripts.insert(self.next_script, script);
        Ok(self.next_script)
    }

    fn run(&mut self, id: u64) -> std::result::Result<V8Value, Exception> {
        let script = self
            .scripts
            .remove(&id)
            .ok_or_else(|| Exception::thrown(format!("Error: unknown script {id}")))?;

        let scope = &mut self.runtime.handle_scope();
        let tc = &mut v8::TryCatch::new(scope);
        let script = v8::Local::new(tc, &script);

        let Some(value) = script.run(tc) else {
            return Err(capture(tc, &self.heap_exhausted, self.max_heap_bytes));
        };

        if value.is_undefined() {
            return Ok(V8Value {
                kind: ValueKind::Empty,
                text: None,
            });
        }

        if value.is_string() || value.is_number() || value.is_boolean() {
            return Ok(V8Value {
                kind: ValueKind::Primitive,
                text: Some(value.to_rust_string_lossy(tc)),
            });
        }

        let json = v8::json::stringify(tc, value)
            .map(|json| json.to_rust_string_lossy(tc))
            .filter(|json| json != "undefined");
        if tc.has_terminated() {
            return Err(capture(tc, &self.heap_exhausted, self.max_heap_bytes));
        }
        tc.reset();

        Ok(V8Value {
            kind: ValueKind::Object,
            text: json,
        })
    }

    fn instrument(&mut self, source: &str) -> std::result::Result<String, Exception> {
        let scope = &mut self.runtime.handle_scope();
        let tc = &mut v8::TryCatch::new(scope);
        match natives::inject_gas(tc, source) {
            Some(instrumented) => Ok(instrumented),
            None => Err(capture(tc, &self.heap_exhausted, self.max_heap_bytes)),
        }
    }

    /// Compile and run `source`, discarding the value
    fn evaluate(&mut self, source: &str, name: &str) -> std::result::Result<(), Exception> {
        let id = self.compile(source, name)?;
        self.run(id).map(|_| ())
    }
}

/// Turn the exception caught by `tc` into an [`Exception`].
fn capture(
    tc: &mut v8::TryCatch<v8::HandleScope>,
    heap_exhausted: &Cell<bool>,
    max_heap_bytes: Option<usize>,
) -> Exception {
    if tc.has_terminated() {
        if heap_exhausted.replace(false) {
            return Exception::thrown(format!(
                "RangeError: heap limit of {} bytes reached",
                max_heap_bytes.unwrap_or_default()
            ));
        }
        return Exception::terminated();
    }

    let text = match tc.exception() {
        Some(exception) => exception.to_rust_string_lossy(tc),
        None => "unknown exception".to_string(),
    };
    let mut exception = Exception::thrown(text);

    if let Some(message) = tc.message() {
        let resource = message
            .get_script_resource_name(tc)
            .map(|name| name.to_rust_string_lossy(tc))
            .unwrap_or_default();
        let source_line = message
            .get_source_line(tc)
            .map(|line| line.to_rust_string_lossy(tc));

        exception = exception.with_location(SourceLocation {
            resource,
            line: message.get_line_number(tc),
            start_column: Some(message.get_start_column()),
            end_column: Some(message.get_end_column()),
            source_line,
        });
    }

    if let Some(stack) = tc.stack_trace() {
        if stack.is_string() {
            let stack = stack.to_rust_string_lossy(tc);
            if !stack.is_empty() {
                exception = exception.with_stack(stack);
            }
        }
    }

    exception
}
