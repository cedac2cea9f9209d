//! Contract calls: load a contract module and invoke one of its APIs.
//!
//! A contract is a CommonJS-style module whose `module.exports` is a
//! constructor. Calling API `transfer` with arguments `["alice", 10]`
//! evaluates the module, instantiates it and returns the value of
//! `new Contract().transfer("alice", 10)`.

use crate::engine::Engine;
use crate::error::Result;
use crate::pool::SandboxPool;
use crate::sandbox::Sandbox;
use cvm_common::ExecutionResult;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Source that loads `code` as a contract module and calls `api` with `args`.
///
/// The API name and arguments are embedded as JSON literals, so neither can
/// change the structure of the generated source. Everything runs inside one
/// function scope, leaving the global object untouched between calls.
pub fn call_source(code: &str, api: &str, args: &[Value]) -> String {
    let api = Value::from(api);
    let args = Value::Array(args.to_vec());

    format!(
        r#"(function () {{
const module = {{ exports: {{}} }};
(function (module, exports) {{
{code}
}})(module, module.exports);
const Contract = module.exports;
if (typeof Contract !== "function") {{
    throw new TypeError("contract module does not export a constructor");
}}
const contract = new Contract();
const api = {api};
if (typeof contract[api] !== "function") {{
    throw new TypeError("contract has no api '" + api + "'");
}}
return contract[api](...{args});
}})()"#
    )
}

impl<E: Engine> Sandbox<E> {
    /// Build the source that calls `api` on the contract in `code`
    pub fn prepare(&self, code: &str, api: &str, args: &[Value]) -> String {
        E::prepare(code, api, args)
    }

    /// Load the contract in `code` and call `api` with `args`, under the
    /// sandbox's gas limit and `deadline`.
    pub fn call(
        &self,
        code: &str,
        api: &str,
        args: &[Value],
        deadline: Instant,
    ) -> ExecutionResult {
        tracing::debug!(api, args = args.len(), "Calling contract api");
        self.execute(&self.prepare(code, api, args), deadline)
    }
}

impl<E: Engine> SandboxPool<E> {
    /// Check out a sandbox, call `api` on the contract in `code`, and recycle
    /// the sandbox. Every call starts from a fresh context.
    pub fn load_and_call(
        self: &Arc<Self>,
        code: &str,
        api: &str,
        args: &[Value],
        deadline: Instant,
    ) -> Result<ExecutionResult> {
        let sandbox = self.checkout()?;
        Ok(sandbox.call(code, api, args, deadline))
    }
}
