//! Native functions registered on the global object.
//!
//! Callbacks find the sandbox's [`HostContext`] in an isolate slot, so they
//! can be registered before the host is installed; until then they throw.

use crate::host::HostContext;
use crate::resolver::ModuleSource;
use crate::SandboxError;
use deno_core::{serde_v8, v8};
use std::sync::Arc;

/// Global the gas-injection transform is looked up under
pub(super) const INJECT_GAS: &str = "injectGas";

pub(super) fn host_context(scope: &mut v8::HandleScope) -> Option<Arc<HostContext>> {
    let host = scope.get_slot::<Arc<HostContext>>().cloned();
    if host.is_none() {
        throw_error(scope, "host capabilities not installed");
    }
    host
}

pub(super) fn throw_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(text) = v8::String::new(scope, message) {
        let exception = v8::Exception::error(scope, text);
        scope.throw_exception(exception);
    }
}

fn optional_string(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<String> {
    value
        .is_string()
        .then(|| value.to_rust_string_lossy(scope))
}

/// Set `callback` as `name` on `target`.
pub(super) fn register(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) -> crate::Result<()> {
    let function = v8::Function::new(scope, callback)
        .ok_or_else(|| SandboxError::Engine(format!("failed to create native {name}")))?;
    set_global(scope, target, name, function.into())
}

/// Expose a domain [`HostFunction`](crate::HostFunction) as a global.
pub(super) fn register_host_function(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
) -> crate::Result<()> {
    let data = v8::String::new(scope, name)
        .ok_or_else(|| SandboxError::Engine(format!("invalid host function name {name}")))?;
    let function = v8::Function::builder(host_function)
        .data(data.into())
        .build(scope)
        .ok_or_else(|| SandboxError::Engine(format!("failed to create host function {name}")))?;
    set_global(scope, target, name, function.into())
}

fn set_global(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    value: v8::Local<v8::Value>,
) -> crate::Result<()> {
    let key = v8::String::new(scope, name)
        .ok_or_else(|| SandboxError::Engine(format!("invalid global name {name}")))?;
    match target.set(scope, key.into(), value) {
        Some(true) => Ok(()),
        _ => Err(SandboxError::Engine(format!("failed to set global {name}"))),
    }
}

pub(super) fn script_origin<'s>(
    scope: &mut v8::HandleScope<'s>,
    name: v8::Local<'s, v8::String>,
) -> v8::ScriptOrigin<'s> {
    v8::ScriptOrigin::new(
        scope,
        name.into(),
        0,
        0,
        false,
        0,
        None,
        false,
        false,
        false,
        None,
    )
}

/// Compile `source` under the resource name `name`. On failure the exception
/// is left pending on `scope`.
pub(super) fn compile_script<'s>(
    scope: &mut v8::HandleScope<'s>,
    source: &str,
    name: &str,
) -> Option<v8::Local<'s, v8::Script>> {
    let source = v8::String::new(scope, source)?;
    let name = v8::String::new(scope, name)?;
    let origin = script_origin(scope, name);
    v8::Script::compile(scope, source, Some(&origin))
}

/// Call the global `injectGas(source)`. Throws a `ReferenceError` when the
/// transform is not defined.
pub(super) fn inject_gas(scope: &mut v8::HandleScope, source: &str) -> Option<String> {
    let context = scope.get_current_context();
    let global = context.global(scope);
    let key = v8::String::new(scope, INJECT_GAS)?;
    let transform = global
        .get(scope, key.into())
        .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok());

    let Some(transform) = transform else {
        let message = v8::String::new(scope, &format!("{INJECT_GAS} is not defined"))?;
        let exception = v8::Exception::reference_error(scope, message);
        scope.throw_exception(exception);
        return None;
    };

    let source = v8::String::new(scope, source)?;
    let recv = v8::undefined(scope).into();
    let result = transform.call(scope, recv, &[source.into()])?;
    Some(result.to_rust_string_lossy(scope))
}

/// `_native_log(message)`
pub(super) fn log(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(host) = host_context(scope) else {
        return;
    };
    let message = optional_string(scope, args.get(0));
    if let Err(e) = host.log(message.as_deref()) {
        throw_error(scope, &e.to_string());
    }
}

/// `_native_run(source, fileName)`: compile and run `source` under
/// `fileName`, returning its value.
pub(super) fn run(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let file_name = optional_string(scope, args.get(1));
    let file_name = match HostContext::check_run_file_name(file_name.as_deref()) {
        Ok(name) => name.to_string(),
        Err(e) => return throw_error(scope, &e.to_string()),
    };
    let source = args.get(0).to_rust_string_lossy(scope);

    let Some(script) = compile_script(scope, &source, &file_name) else {
        return;
    };
    if let Some(value) = script.run(scope) {
        rv.set(value);
    }
}

/// `_native_require(module)`: a module from the module path comes back as
/// source text; one from the fallback resolver is gas-instrumented, run
/// under its own name, and its value returned.
pub(super) fn require(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(host) = host_context(scope) else {
        return;
    };
    let module = optional_string(scope, args.get(0)).unwrap_or_default();

    match host.modules().resolve(&module) {
        Ok(ModuleSource::Local(text)) => {
            if let Some(text) = v8::String::new(scope, &text) {
                rv.set(text.into());
            }
        }
        Ok(ModuleSource::Fallback(source)) => {
            let Some(instrumented) = inject_gas(scope, &source) else {
                return;
            };
            let Some(script) = compile_script(scope, &instrumented, &module) else {
                return;
            };
            if let Some(value) = script.run(scope) {
                rv.set(value);
            }
        }
        Err(e) => {
            tracing::debug!(module = %module, error = %e, "Require failed");
            throw_error(scope, &e.to_string());
        }
    }
}

/// `_native_gas(amount)`: the accounting callback instrumented code calls.
pub(super) fn gas(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(host) = host_context(scope) else {
        return;
    };
    let amount = args.get(0);
    let amount = if amount.is_number() {
        amount.number_value(scope).unwrap_or(f64::NAN)
    } else {
        f64::NAN
    };
    if let Err(e) = host.charge_gas(amount) {
        throw_error(scope, &e.to_string());
    }
}

fn host_function(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(host) = host_context(scope) else {
        return;
    };
    let name = args.data().to_rust_string_lossy(scope);

    let mut values = Vec::with_capacity(args.length().max(0) as usize);
    for index in 0..args.length() {
        match serde_v8::from_v8::<serde_json::Value>(scope, args.get(index)) {
            Ok(value) => values.push(value),
            Err(e) => {
                return throw_error(scope, &format!("{name}: argument {index} is not JSON: {e}"))
            }
        }
    }

    match host.call_function(&name, &values) {
        Ok(result) => match serde_v8::to_v8(scope, result) {
            Ok(value) => rv.set(value),
            Err(e) => throw_error(scope, &format!("{name}: result is not representable: {e}")),
        },
        Err(message) => throw_error(scope, &message),
    }
}
