use std::collections::HashMap;

use rand::{Rng, seq::SliceRandom};

use crate::types::{ActorId, ResourceId};

/// Preferred resources per actor, computed once before a run starts.
///
/// Only spreads the first wave of claims across the inventory; whichever
/// resource an actor tries, the claim protocol decides who wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencePlan {
    per_actor: usize,
    preferred: HashMap<ActorId, Vec<ResourceId>>,
}

impl PreferencePlan {
    /// Shuffles actors and resources, then hands each actor (in shuffled order)
    /// the next `max(1, resources / actors)` resources, wrapping around the
    /// shuffled resource list.
    pub fn distribute(
        actors: &[ActorId],
        resources: &[ResourceId],
        rng: &mut impl Rng,
    ) -> Self {
        if actors.is_empty() || resources.is_empty() {
            return Self::default();
        }

        let per_actor = (resources.len() / actors.len()).max(1);

        let mut actor_order = actors.to_vec();
        actor_order.shuffle(rng);
        let mut resource_order = resources.to_vec();
        resource_order.shuffle(rng);

        let preferred = actor_order
            .into_iter()
            .enumerate()
            .map(|(index, actor_id)| {
                let start = (index * per_actor) % resource_order.len();
                let slice = (0..per_actor)
                    .map(|offset| resource_order[(start + offset) % resource_order.len()])
                    .collect();
                (actor_id, slice)
            })
            .collect();

        Self {
            per_actor,
            preferred,
        }
    }

    pub fn per_actor(&self) -> usize {
        self.per_actor
    }

    pub fn preferred_for(&self, actor_id: ActorId) -> &[ResourceId] {
        self.preferred
            .get(&actor_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.preferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preferred.is_empty()
    }
}
