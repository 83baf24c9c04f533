//! Optimistic-concurrency update engine.
//!
//! Each round groups the pending patches by target object, reads the objects
//! with their versions, computes one partial update per object and submits
//! them as a single versioned bulk write. Objects that lost a version race
//! have all of their patches carried into the next round; everything else is
//! final. Rounds continue until no conflicts remain, or until
//! `max_update_rounds` is reached when it is configured.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;
use crate::transport::{BulkAction, SearchTransport};
use crate::types::{BatchResult, ObjectRef, Patch, is_global_model};

/// The patches destined for one object.
#[derive(Debug, Clone)]
struct PatchGroup {
    target: ObjectRef,
    patches: Vec<Patch>,
}

/// Groups patches by target id, keeping first-seen order.
///
/// The first patch for an id fixes the group's type and application.
/// Patches must already have valid paths.
fn group_by_target(patches: Vec<Patch>) -> Vec<PatchGroup> {
    let mut groups: Vec<PatchGroup> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for patch in patches {
        let Ok(target) = patch.target() else {
            continue;
        };
        let id = target.id.to_string();

        match positions.get(&id) {
            Some(&position) => groups[position].patches.push(patch),
            None => {
                let mut reference = ObjectRef::new(target.object_type, target.id);
                reference.application_id = patch.application_id.clone();
                positions.insert(id, groups.len());
                groups.push(PatchGroup {
                    target: reference,
                    patches: vec![patch],
                });
            }
        }
    }

    groups
}

/// Applies patches through an [`ObjectStore`] under optimistic concurrency.
#[derive(Debug)]
pub struct OptimisticUpdater<'a> {
    store: &'a ObjectStore,
    max_rounds: Option<u32>,
}

impl<'a> OptimisticUpdater<'a> {
    /// Creates an updater honouring the store's `max_update_rounds`.
    pub fn new(store: &'a ObjectStore) -> Self {
        Self {
            store,
            max_rounds: store.config().max_update_rounds,
        }
    }

    /// Overrides the round cap.
    pub fn with_max_rounds(mut self, max_rounds: Option<u32>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Runs the update loop to completion.
    pub async fn run(&self, patches: Vec<Patch>) -> StorageResult<BatchResult<String>> {
        if patches.is_empty() {
            return Err(StorageError::invalid_field_value([
                "updateObjects: \"patches\" should be a non-empty array",
            ]));
        }

        let mut result = BatchResult::new();
        let mut pending = Vec::with_capacity(patches.len());
        for patch in patches {
            match patch.target() {
                Ok(_) => pending.push(patch),
                Err(e) => result.errors.push(e),
            }
        }

        let mut round: u32 = 0;
        while !pending.is_empty() {
            if self.max_rounds.is_some_and(|max| round >= max) {
                for group in group_by_target(pending) {
                    warn!(
                        id = %group.target.id,
                        rounds = round,
                        "Giving up on conflicting update"
                    );
                    result.errors.push(StorageError::server_failure([format!(
                        "Failed to update {} with ID {}: still conflicting after {} rounds",
                        group.target.object_type, group.target.id, round
                    )]));
                }
                break;
            }

            round += 1;
            pending = self.round(pending, &mut result.errors).await?;
            if !pending.is_empty() {
                debug!(round, requeued = pending.len(), "Retrying conflicting updates");
            }
        }

        Ok(result)
    }

    /// Runs one read-diff-write round and returns the patches to retry.
    async fn round(
        &self,
        pending: Vec<Patch>,
        errors: &mut Vec<StorageError>,
    ) -> StorageResult<Vec<Patch>> {
        let resolver = self.store.resolver();

        let mut groups = Vec::new();
        let mut indexes = HashMap::new();
        for group in group_by_target(pending) {
            match resolver.for_ref(&group.target) {
                Ok(index) => {
                    indexes.insert(group.target.id.clone(), index);
                    groups.push(group);
                }
                Err(e) => errors.push(e),
            }
        }
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let refs: Vec<ObjectRef> = groups.iter().map(|g| g.target.clone()).collect();
        let fetched = self.store.get_objects(&refs).await?;
        errors.extend(fetched.errors);

        let objects: HashMap<&str, _> = fetched
            .results
            .iter()
            .map(|object| (object.id.as_str(), object))
            .collect();

        let mut refresh = false;
        let mut actions = Vec::new();
        let mut submitted = Vec::new();

        for group in groups {
            let Some(current) = objects.get(group.target.id.as_str()) else {
                continue;
            };
            let diff = match self.store.patcher().process_object(&group.patches, current) {
                Ok(diff) => diff,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if diff.is_empty() {
                continue;
            }
            let Some(index) = indexes.remove(&group.target.id) else {
                continue;
            };

            refresh |= is_global_model(&group.target.object_type);
            actions.push(BulkAction::Update {
                index,
                id: group.target.id.clone(),
                doc: Value::Object(diff.diff),
                version: fetched.versions.get(&group.target.id).copied(),
            });
            submitted.push(group);
        }

        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.store.connection().bulk(actions, refresh).await?;

        let mut retry = Vec::new();
        for (item, group) in response.items.into_iter().zip(submitted) {
            if item.is_conflict() {
                retry.extend(group.patches);
            } else if !item.is_success() {
                errors.push(StorageError::server_failure([format!(
                    "Failed to update {} with ID {}: {}",
                    group.target.object_type,
                    group.target.id,
                    item.error.unwrap_or_else(|| format!("status {}", item.status))
                )]));
            }
        }

        Ok(retry)
    }
}
