//! Pool of ready sandboxes.
//!
//! A sandbox is never handed out twice: returning one releases it and puts a
//! freshly created replacement in the pool, so every checkout starts from a
//! clean context with zeroed gas and the default module path.

use crate::engine::Engine;
use crate::error::Result;
use crate::sandbox::Sandbox;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

type Factory<E> = Box<dyn Fn() -> Result<Sandbox<E>> + Send + Sync>;

pub struct SandboxPool<E: Engine> {
    factory: Factory<E>,
    idle: Mutex<Vec<Sandbox<E>>>,
    capacity: usize,
}

impl<E: Engine> SandboxPool<E> {
    /// Create a pool and fill it with `capacity` sandboxes from `factory`.
    pub fn new(
        capacity: usize,
        factory: impl Fn() -> Result<Sandbox<E>> + Send + Sync + 'static,
    ) -> Result<Arc<Self>> {
        let idle = (0..capacity)
            .map(|_| factory())
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(capacity, "Sandbox pool filled");
        Ok(Arc::new(Self {
            factory: Box::new(factory),
            idle: Mutex::new(idle),
            capacity,
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ready sandboxes
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Take a ready sandbox, creating one if the pool is empty.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledSandbox<E>> {
        let ready = self.idle.lock().pop();
        let sandbox = match ready {
            Some(sandbox) => sandbox,
            None => {
                tracing::debug!("Sandbox pool empty, creating on demand");
                (self.factory)()?
            }
        };

        Ok(PooledSandbox {
            sandbox: Some(sandbox),
            pool: Arc::clone(self),
        })
    }

    fn recycle(&self, used: Sandbox<E>) {
        used.release();

        if self.idle() >= self.capacity {
            return;
        }
        match (self.factory)() {
            Ok(fresh) => {
                let mut idle = self.idle.lock();
                if idle.len() < self.capacity {
                    idle.push(fresh);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to replace recycled sandbox"),
        }
    }
}

impl<E: Engine> std::fmt::Debug for SandboxPool<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxPool")
            .field("capacity", &self.capacity)
            .field("idle", &self.idle())
            .finish()
    }
}

/// A checked-out sandbox. Dropping it recycles the sandbox.
pub struct PooledSandbox<E: Engine> {
    sandbox: Option<Sandbox<E>>,
    pool: Arc<SandboxPool<E>>,
}

impl<E: Engine> Deref for PooledSandbox<E> {
    type Target = Sandbox<E>;

    fn deref(&self) -> &Sandbox<E> {
        // Only taken in Drop
        match &self.sandbox {
            Some(sandbox) => sandbox,
            None => unreachable!("pooled sandbox used after recycle"),
        }
    }
}

impl<E: Engine> Drop for PooledSandbox<E> {
    fn drop(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            self.pool.recycle(sandbox);
        }
    }
}
