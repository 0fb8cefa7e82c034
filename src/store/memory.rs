use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    store::{
        error::{
            StoreError, StoreErrorKind, conflict_abort, connection_error, invariant_violation,
            query_error, timeout,
        },
        ports::{ClaimTransaction, ReservationStore},
    },
    types::{
        ActorId, ClaimId, ClaimRecord, ClaimStatus, IsolationLevel, Resource, ResourceId,
        TEST_LAB_ID,
    },
};

type TxId = u64;

const CLAIM_START_OFFSET: time::Duration = time::Duration::minutes(30);
const CLAIM_END_OFFSET: time::Duration = time::Duration::minutes(150);

#[derive(Debug, Clone)]
struct ResourceRow {
    code: String,
    // (commit sequence, available), oldest first
    versions: Vec<(u64, bool)>,
    locked_by: Option<TxId>,
}

impl ResourceRow {
    fn new(code: String) -> Self {
        Self {
            code,
            versions: vec![(0, true)],
            locked_by: None,
        }
    }

    fn latest(&self) -> (u64, bool) {
        self.versions.last().copied().unwrap_or((0, false))
    }

    fn available_at(&self, snapshot_seq: u64) -> bool {
        self.versions
            .iter()
            .rev()
            .find(|(seq, _)| *seq <= snapshot_seq)
            .is_some_and(|(_, available)| *available)
    }

    fn modified_after(&self, snapshot_seq: u64) -> bool {
        self.latest().0 > snapshot_seq
    }

    fn push_version(&mut self, seq: u64, available: bool) {
        if self.latest().1 != available {
            self.versions.push((seq, available));
        }
    }
}

#[derive(Debug, Clone)]
struct ClaimRow {
    record: ClaimRecord,
    committed_seq: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    commit_seq: u64,
    next_tx_id: TxId,
    next_claim_id: ClaimId,
    claims_modified_seq: u64,
    actors: BTreeSet<ActorId>,
    resources: BTreeMap<ResourceId, ResourceRow>,
    claims: Vec<ClaimRow>,
    injected_failures: VecDeque<StoreErrorKind>,
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process transactional store.
///
/// Weak transactions read the latest committed rows. Repeatable and strict
/// transactions read the snapshot taken at `begin`; locking a row that changed
/// after the snapshot aborts with a serialization failure. Strict commits are
/// additionally validated against claim rows committed after the snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    op_latency: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actors `1..=actors` and resources `1..=resources`, all available.
    pub fn seeded(actors: usize, resources: usize) -> Self {
        let store = Self::new();
        {
            let mut state = lock_state(&store.state);
            state.actors = (1..=actors as ActorId).collect();
            state.resources = (1..=resources as ResourceId)
                .map(|id| (id, ResourceRow::new(format!("R-{id:03}"))))
                .collect();
        }
        store
    }

    /// Every statement sleeps this long before touching state, which lets
    /// concurrent transactions interleave.
    pub fn with_op_latency(mut self, op_latency: Duration) -> Self {
        self.op_latency = op_latency;
        self
    }

    /// The next `count` commits fail with `kind`.
    pub fn inject_failures(&self, kind: StoreErrorKind, count: usize) {
        let mut state = lock_state(&self.state);
        state
            .injected_failures
            .extend(std::iter::repeat_n(kind, count));
    }

    pub fn pending_injected_failures(&self) -> usize {
        lock_state(&self.state).injected_failures.len()
    }

    pub fn available_count(&self) -> usize {
        lock_state(&self.state)
            .resources
            .values()
            .filter(|row| row.latest().1)
            .count()
    }

    /// Every committed claim row, in commit order.
    pub fn claim_rows(&self) -> Vec<ClaimRecord> {
        lock_state(&self.state)
            .claims
            .iter()
            .map(|row| row.record.clone())
            .collect()
    }

    pub fn is_locked(&self, resource_id: ResourceId) -> bool {
        lock_state(&self.state)
            .resources
            .get(&resource_id)
            .is_some_and(|row| row.locked_by.is_some())
    }

    async fn pause(&self) {
        pause_for(self.op_latency).await;
    }
}

async fn pause_for(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.pause().await;
        Ok(())
    }

    async fn count_resources(&self) -> Result<usize, StoreError> {
        self.pause().await;
        Ok(lock_state(&self.state).resources.len())
    }

    async fn eligible_actors(&self) -> Result<Vec<ActorId>, StoreError> {
        self.pause().await;
        Ok(lock_state(&self.state).actors.iter().copied().collect())
    }

    async fn list_available_resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.pause().await;
        let state = lock_state(&self.state);
        Ok(state
            .resources
            .iter()
            .filter(|(_, row)| row.latest().1)
            .map(|(id, row)| Resource {
                id: *id,
                code: row.code.clone(),
                available: true,
            })
            .collect())
    }

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn ClaimTransaction>, StoreError> {
        self.pause().await;
        let mut state = lock_state(&self.state);
        state.next_tx_id += 1;
        Ok(Box::new(MemoryTransaction {
            id: state.next_tx_id,
            isolation,
            snapshot_seq: state.commit_seq,
            state: Arc::clone(&self.state),
            op_latency: self.op_latency,
            held_locks: Vec::new(),
            pending_binds: Vec::new(),
            read_claims: false,
            finished: false,
        }))
    }

    async fn active_claims(&self) -> Result<Vec<ClaimRecord>, StoreError> {
        self.pause().await;
        let now = OffsetDateTime::now_utc();
        Ok(lock_state(&self.state)
            .claims
            .iter()
            .filter(|row| row.record.is_active_at(now))
            .map(|row| row.record.clone())
            .collect())
    }

    async fn reset_all_resources_and_purge_test_claims(&self) -> Result<(), StoreError> {
        self.pause().await;
        let mut state = lock_state(&self.state);
        state.commit_seq += 1;
        let seq = state.commit_seq;
        for row in state.resources.values_mut() {
            row.push_version(seq, true);
        }
        state.claims.retain(|row| row.record.lab_id != TEST_LAB_ID);
        state.claims_modified_seq = seq;
        Ok(())
    }
}

struct MemoryTransaction {
    id: TxId,
    isolation: IsolationLevel,
    snapshot_seq: u64,
    state: Arc<Mutex<MemoryState>>,
    op_latency: Duration,
    held_locks: Vec<ResourceId>,
    pending_binds: Vec<(ActorId, ResourceId)>,
    read_claims: bool,
    finished: bool,
}

impl MemoryTransaction {
    fn release_locks(&mut self, state: &mut MemoryState) {
        for resource_id in self.held_locks.drain(..) {
            if let Some(row) = state.resources.get_mut(&resource_id)
                && row.locked_by == Some(self.id)
            {
                row.locked_by = None;
            }
        }
        self.finished = true;
    }

    fn claim_visible(&self, row: &ClaimRow) -> bool {
        !self.isolation.uses_snapshot() || row.committed_seq <= self.snapshot_seq
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let shared = Arc::clone(&self.state);
        let mut state = lock_state(&shared);
        self.release_locks(&mut state);
    }
}

fn injected_error(kind: StoreErrorKind) -> StoreError {
    match kind {
        StoreErrorKind::ConflictAbort => {
            conflict_abort("injected: could not serialize access due to concurrent update")
        }
        StoreErrorKind::Timeout => timeout("injected: statement timeout"),
        StoreErrorKind::Connection => connection_error("injected: connection reset by peer"),
        StoreErrorKind::Query => query_error("injected: query failed"),
        StoreErrorKind::Invariant => invariant_violation("injected: invariant violated"),
    }
}

#[async_trait]
impl ClaimTransaction for MemoryTransaction {
    async fn has_active_claim(&mut self, actor_id: ActorId) -> Result<bool, StoreError> {
        pause_for(self.op_latency).await;
        let now = OffsetDateTime::now_utc();
        let state = lock_state(&self.state);
        self.read_claims = true;
        let committed = state.claims.iter().any(|row| {
            row.record.actor_id == actor_id
                && row.record.is_active_at(now)
                && self.claim_visible(row)
        });
        let pending = self
            .pending_binds
            .iter()
            .any(|(pending_actor, _)| *pending_actor == actor_id);
        Ok(committed || pending)
    }

    async fn lock_resource_if_available(
        &mut self,
        resource_id: ResourceId,
    ) -> Result<bool, StoreError> {
        pause_for(self.op_latency).await;
        let shared = Arc::clone(&self.state);
        let mut state = lock_state(&shared);
        let Some(row) = state.resources.get_mut(&resource_id) else {
            return Ok(false);
        };

        let visible = if self.isolation.uses_snapshot() {
            row.available_at(self.snapshot_seq)
        } else {
            row.latest().1
        };
        if !visible {
            return Ok(false);
        }

        match row.locked_by {
            Some(owner) if owner == self.id => return Ok(true),
            Some(_) => return Ok(false),
            None => {}
        }

        if self.isolation.uses_snapshot() && row.modified_after(self.snapshot_seq) {
            return Err(conflict_abort(format!(
                "could not serialize access due to concurrent update of resource {resource_id}"
            )));
        }

        row.locked_by = Some(self.id);
        self.held_locks.push(resource_id);
        Ok(true)
    }

    async fn bind_resource_and_insert_claim(
        &mut self,
        actor_id: ActorId,
        resource_id: ResourceId,
    ) -> Result<(), StoreError> {
        pause_for(self.op_latency).await;
        let state = lock_state(&self.state);
        let locked_by_self = state
            .resources
            .get(&resource_id)
            .is_some_and(|row| row.locked_by == Some(self.id));
        if !locked_by_self {
            return Err(invariant_violation(format!(
                "resource {resource_id} must be locked before it is bound"
            )));
        }
        drop(state);
        self.pending_binds.push((actor_id, resource_id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        pause_for(self.op_latency).await;
        let shared = Arc::clone(&self.state);
        let mut state = lock_state(&shared);

        if let Some(kind) = state.injected_failures.pop_front() {
            self.release_locks(&mut state);
            return Err(injected_error(kind));
        }

        if self.isolation.is_strict()
            && self.read_claims
            && state.claims_modified_seq > self.snapshot_seq
        {
            self.release_locks(&mut state);
            return Err(conflict_abort(
                "could not serialize access due to read/write dependencies among transactions",
            ));
        }

        if !self.pending_binds.is_empty() {
            state.commit_seq += 1;
            let seq = state.commit_seq;
            let now = OffsetDateTime::now_utc();
            for (actor_id, resource_id) in std::mem::take(&mut self.pending_binds) {
                if let Some(row) = state.resources.get_mut(&resource_id) {
                    row.push_version(seq, false);
                }
                state.next_claim_id += 1;
                let record = ClaimRecord {
                    id: state.next_claim_id,
                    actor_id,
                    resource_id,
                    lab_id: TEST_LAB_ID,
                    status: ClaimStatus::Confirmed,
                    requested_at: now,
                    starts_at: now + CLAIM_START_OFFSET,
                    ends_at: now + CLAIM_END_OFFSET,
                };
                state.claims.push(ClaimRow {
                    record,
                    committed_seq: seq,
                });
            }
            state.claims_modified_seq = seq;
        }

        self.release_locks(&mut state);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let shared = Arc::clone(&self.state);
        let mut state = lock_state(&shared);
        self.pending_binds.clear();
        self.release_locks(&mut state);
        Ok(())
    }
}
