//! Sandbox service - async entry point
//!
//! Runs requests against one sandbox from async code. The supervisor loop is
//! blocking, so each execution is moved onto tokio's blocking pool.

use crate::engine::Engine;
use crate::error::{Result, SandboxError};
use crate::sandbox::Sandbox;
use cvm_common::{ExecutionRequest, ExecutionResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// What the service remembers about an execution
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    pub result: Option<ExecutionResult>,
}

/// Async facade over a single sandbox.
pub struct SandboxService<E: Engine> {
    sandbox: Arc<Sandbox<E>>,
    /// Keeps a request's gas limit and its execution together
    turn: Mutex<()>,
    executions: RwLock<HashMap<ExecutionId, ExecutionRecord>>,
}

impl<E: Engine> SandboxService<E> {
    pub fn new(sandbox: Sandbox<E>) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
            turn: Mutex::new(()),
            executions: RwLock::new(HashMap::new()),
        }
    }

    pub fn sandbox(&self) -> &Sandbox<E> {
        &self.sandbox
    }

    /// Execute a request. The timeout starts when the request's turn comes.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<(ExecutionId, ExecutionResult)> {
        let id = ExecutionId::new();
        self.executions.write().await.insert(
            id,
            ExecutionRecord {
                id,
                status: ExecutionStatus::Running,
                result: None,
            },
        );

        let _turn = self.turn.lock().await;
        if let Some(limit) = request.gas_limit {
            self.sandbox.set_gas_limit(limit);
        }

        tracing::info!(
            execution_id = %id,
            code_len = request.code.len(),
            gas_limit = self.sandbox.gas_limit(),
            timeout = ?request.timeout,
            "Executing script"
        );

        let sandbox = Arc::clone(&self.sandbox);
        let deadline = Instant::now() + request.timeout;
        let code = request.code;
        let joined = tokio::task::spawn_blocking(move || sandbox.execute(&code, deadline)).await;

        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                self.executions.write().await.remove(&id);
                return Err(SandboxError::Engine(format!("execution task failed: {e}")));
            }
        };

        let status = if result.success() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        tracing::info!(
            execution_id = %id,
            status = ?status,
            gas_used = result.gas_used,
            "Script finished"
        );

        if let Some(record) = self.executions.write().await.get_mut(&id) {
            record.status = status;
            record.result = Some(result.clone());
        }
        Ok((id, result))
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        self.executions.read().await.get(&id).cloned()
    }

    pub async fn list_executions(&self) -> Vec<ExecutionRecord> {
        self.executions.read().await.values().cloned().collect()
    }

    /// Forget finished executions
    pub async fn cleanup_completed(&self) {
        self.executions
            .write()
            .await
            .retain(|_, record| record.status == ExecutionStatus::Running);
    }
}
