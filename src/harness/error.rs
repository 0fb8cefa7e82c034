use thiserror::Error;

use crate::{
    store::StoreError,
    types::{ActorId, ResourceId},
};

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error(
        "retries exhausted for actor {actor_id} and resource {resource_id} after {attempts} attempts"
    )]
    RetriesExhausted {
        actor_id: ActorId,
        resource_id: ResourceId,
        attempts: u32,
    },
    #[error("claim of resource {resource_id} by actor {actor_id} failed: {source}")]
    Store {
        actor_id: ActorId,
        resource_id: ResourceId,
        #[source]
        source: StoreError,
    },
}

/// Failures that stop a run before any actor task starts.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no eligible actors found in the store")]
    NoEligibleActors,
    #[error("actor count must be positive")]
    InvalidActorCount,
    #[error("admission gate closed before the actor was admitted")]
    AdmissionClosed,
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

pub(crate) fn store_failure(context: &'static str) -> impl FnOnce(StoreError) -> HarnessError {
    move |source| HarnessError::Store { context, source }
}
