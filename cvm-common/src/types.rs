//! Core types exchanged with the sandbox host

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request to execute a script inside a sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The script source to execute
    pub code: String,

    /// Wall-clock budget; converted into an absolute deadline when the
    /// execution starts
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Gas budget for this execution (None keeps the sandbox's current limit)
    #[serde(default)]
    pub gas_limit: Option<u64>,
}

impl ExecutionRequest {
    /// Create a request with a 1 second timeout
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: Duration::from_secs(1),
            gas_limit: None,
        }
    }

    /// Set the wall-clock budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the gas budget
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// Result of one `execute` call.
///
/// Exactly one of `value` / `error` is set, except for a script that
/// completed without producing anything: that is a success with neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Display text of a primitive result, or JSON text of an object result
    pub value: Option<String>,

    /// Human-readable failure report; never meant to be parsed
    pub error: Option<String>,

    /// Whether `value` holds JSON
    pub is_json: bool,

    /// Gas counter snapshot taken when the outcome was decided
    pub gas_used: u64,
}

impl ExecutionResult {
    /// A completed execution that produced a value
    pub fn value(value: impl Into<String>, is_json: bool, gas_used: u64) -> Self {
        Self {
            value: Some(value.into()),
            error: None,
            is_json,
            gas_used,
        }
    }

    /// A completed execution with nothing to report
    pub fn empty(gas_used: u64) -> Self {
        Self {
            gas_used,
            ..Self::default()
        }
    }

    /// A failed execution
    pub fn failure(error: impl Into<String>, gas_used: u64) -> Self {
        Self {
            value: None,
            error: Some(error.into()),
            is_json: false,
            gas_used,
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Parse a JSON result into a [`serde_json::Value`]
    pub fn json(&self) -> Option<serde_json::Value> {
        if !self.is_json {
            return None;
        }
        self.value
            .as_deref()
            .and_then(|text| serde_json::from_str(text).ok())
    }
}
