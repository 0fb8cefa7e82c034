use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    harness::{error::HarnessError, types::AdmissionConfig},
    types::IsolationLevel,
};

/// Bounds how many actor tasks attempt claims at the same time.
///
/// Strict runs get the smallest capacity since extra parallelism there mostly
/// turns into conflict-aborts.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    capacity: usize,
    permits: Arc<Semaphore>,
}

/// Held for the whole life of an admitted actor task; dropping it readmits
/// the next waiting task.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn for_run(config: &AdmissionConfig, isolation: IsolationLevel, actor_count: usize) -> Self {
        Self::new(config.capacity_for(isolation, actor_count))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub async fn admit(&self) -> Result<AdmissionPermit, HarnessError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HarnessError::AdmissionClosed)?;
        Ok(AdmissionPermit { _permit: permit })
    }
}
