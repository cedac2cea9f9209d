//! Sandbox pool and async service

use crate::common::{far_deadline, setup_test_logging};
use cvm_sandbox::testing::ScriptedEngine;
use cvm_sandbox::{ExecutionRequest, ExecutionStatus, Sandbox, SandboxPool, SandboxService};
use std::sync::Arc;
use std::time::Duration;

fn factory() -> cvm_sandbox::Result<Sandbox<ScriptedEngine>> {
    Sandbox::builder(ScriptedEngine::new()).gas_limit(50).build()
}

#[test]
fn test_pool_checkout_and_return() {
    setup_test_logging();
    let pool = SandboxPool::new(2, factory).unwrap();
    assert_eq!(pool.capacity(), 2);

    {
        let first = pool.checkout().unwrap();
        let second = pool.checkout().unwrap();
        assert_eq!(pool.idle(), 0);

        assert_eq!(first.execute("value a", far_deadline()).value.as_deref(), Some("a"));
        assert_eq!(second.execute("value b", far_deadline()).value.as_deref(), Some("b"));
    }

    assert_eq!(pool.idle(), 2);
}

#[test]
fn test_pool_overflow_is_not_retained() {
    let pool = SandboxPool::new(1, factory).unwrap();

    let held: Vec<_> = (0..3).map(|_| pool.checkout().unwrap()).collect();
    assert_eq!(pool.idle(), 0);
    drop(held);

    assert_eq!(pool.idle(), 1);
}

#[test]
fn test_pool_shared_across_threads() {
    let pool = SandboxPool::new(2, factory).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let sandbox = pool.checkout().unwrap();
                sandbox
                    .execute(&format!("gas {i}\nvalue {i}"), far_deadline())
                    .gas_used
            })
        })
        .collect();

    let mut used: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    used.sort_unstable();
    assert_eq!(used, vec![0, 1, 2, 3]);
}

fn service() -> SandboxService<ScriptedEngine> {
    SandboxService::new(factory().unwrap())
}

#[tokio::test]
async fn test_service_runs_requests_in_turn() {
    let service = Arc::new(service());

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let request = ExecutionRequest::new(format!("gas {i}\nsleep 10\nvalue {i}"))
                    .with_timeout(Duration::from_secs(5));
                service.execute(request).await.unwrap()
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let (_, result) = task.await.unwrap();
        assert_eq!(result.value, Some(i.to_string()));
        assert_eq!(result.gas_used, i as u64);
    }

    let records = service.list_executions().await;
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|record| record.status == ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_service_per_request_gas_limit() {
    let service = service();

    let (id, result) = service
        .execute(ExecutionRequest::new("gas 20\nvalue ok"))
        .await
        .unwrap();
    assert_eq!(result.value.as_deref(), Some("ok"));

    let request = ExecutionRequest::new("gas 20\nspin").with_gas_limit(5);
    let (id2, result) = service.execute(request).await.unwrap();
    assert_eq!(result.error.as_deref(), Some("out of gas: used 20, limit 5"));
    assert_ne!(id, id2);

    let record = service.get_execution(id2).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.result, Some(result));
}

#[tokio::test]
async fn test_service_timeout() {
    let service = service();
    let request = ExecutionRequest::new("spin").with_timeout(Duration::from_millis(15));

    let (id, result) = service.execute(request).await.unwrap();
    assert!(result.error.unwrap().starts_with("execution killed"));

    service.cleanup_completed().await;
    assert!(service.get_execution(id).await.is_none());
}
