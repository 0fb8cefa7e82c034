use async_trait::async_trait;

use crate::{
    store::error::StoreError,
    types::{ActorId, ClaimRecord, IsolationLevel, Resource, ResourceId},
};

/// Storage collaborator consumed by the harness.
///
/// Availability lives only here; the harness never caches it beyond one call.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn count_resources(&self) -> Result<usize, StoreError>;

    async fn eligible_actors(&self) -> Result<Vec<ActorId>, StoreError>;

    /// Currently available resources, ordered by id.
    async fn list_available_resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn ClaimTransaction>, StoreError>;

    /// Committed claims that are still active. Used for post-run verification.
    async fn active_claims(&self) -> Result<Vec<ClaimRecord>, StoreError>;

    /// Administrative reset between runs: every resource becomes available and
    /// claims in the test lab are deleted.
    async fn reset_all_resources_and_purge_test_claims(&self) -> Result<(), StoreError>;
}

/// One open transaction. Dropping it without `commit` or `rollback` releases
/// whatever it holds.
#[async_trait]
pub trait ClaimTransaction: Send {
    async fn has_active_claim(&mut self, actor_id: ActorId) -> Result<bool, StoreError>;

    /// Locks the resource row if it is available and not locked by another
    /// transaction. Returns `false` instead of waiting when contested.
    async fn lock_resource_if_available(
        &mut self,
        resource_id: ResourceId,
    ) -> Result<bool, StoreError>;

    async fn bind_resource_and_insert_claim(
        &mut self,
        actor_id: ActorId,
        resource_id: ResourceId,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
