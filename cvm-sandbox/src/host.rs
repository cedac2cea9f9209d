//! Host capabilities exposed to sandboxed scripts.
//!
//! [`HostContext`] bundles everything a script can reach back into: the gas
//! meter, module loading, and the domain host functions configured for the
//! sandbox. Engines receive it once in [`Engine::install`](crate::Engine::install).

use crate::gas::GasMeter;
use crate::resolver::{ModuleLoader, ModuleResolver};
use crate::SandboxError;
use std::collections::HashMap;
use std::sync::Arc;

/// Global name of the logging capability
pub const NATIVE_LOG: &str = "_native_log";
/// Global name of the compile-and-run capability
pub const NATIVE_RUN: &str = "_native_run";
/// Global name of the module loading capability
pub const NATIVE_REQUIRE: &str = "_native_require";
/// Global name of the gas accounting callback called by instrumented code
pub const NATIVE_GAS: &str = "_native_gas";

/// A domain-specific function callable from scripts (storage, blockchain
/// queries and the like). Arguments and result travel as JSON.
pub trait HostFunction: Send + Sync {
    /// Global name the function is registered under
    fn name(&self) -> &str;

    /// Invoke the function. An `Err` is thrown into the script.
    fn call(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, String>;
}

/// Everything a sandbox exposes to the code running inside it.
pub struct HostContext {
    gas: Arc<GasMeter>,
    modules: ModuleLoader,
    functions: HashMap<String, Arc<dyn HostFunction>>,
}

impl HostContext {
    pub fn new(
        gas: Arc<GasMeter>,
        fallback: Arc<dyn ModuleResolver>,
        functions: Vec<Arc<dyn HostFunction>>,
    ) -> Self {
        let functions = functions
            .into_iter()
            .map(|function| (function.name().to_string(), function))
            .collect();

        Self {
            gas,
            modules: ModuleLoader::new(fallback),
            functions,
        }
    }

    pub fn gas(&self) -> &GasMeter {
        &self.gas
    }

    pub fn modules(&self) -> &ModuleLoader {
        &self.modules
    }

    /// Names of the registered domain host functions
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Dispatch a call to a domain host function by name
    pub fn call_function(
        &self,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, String> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| format!("host function '{name}' is not registered"))?;
        function.call(args)
    }

    /// `_native_log`: only strings are accepted.
    pub fn log(&self, message: Option<&str>) -> Result<(), SandboxError> {
        let message = message.ok_or_else(|| {
            SandboxError::InvalidArgument(format!("{NATIVE_LOG} empty log"))
        })?;
        tracing::info!(target: "cvm::script", "{}", message);
        Ok(())
    }

    /// `_native_run`: the file name must be a string.
    pub fn check_run_file_name(file_name: Option<&str>) -> Result<&str, SandboxError> {
        file_name
            .ok_or_else(|| SandboxError::InvalidArgument(format!("{NATIVE_RUN} empty script.")))
    }

    /// `_native_gas`: negative or non-finite amounts are rejected.
    pub fn charge_gas(&self, amount: f64) -> Result<(), SandboxError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(SandboxError::InvalidArgument(format!(
                "{NATIVE_GAS} expects a non-negative number, got {amount}"
            )));
        }
        self.gas.charge(amount as u64);
        Ok(())
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("gas", &self.gas)
            .field("modules", &self.modules)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
