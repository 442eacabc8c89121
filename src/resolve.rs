//! Content-backed entity resolution
//!
//! Selections are checked against the content store to find the ones that
//! carry attributes. At most one request per (dimension, path) is in flight,
//! and paths already answered are never requested again.

use crate::dimension::DimensionMap;
use crate::entity_path;
use crate::error::{TaggerError, TaggerResult};
use crate::lifecycle::{Lifecycle, Ticket};
use crate::model::Entity;
use crate::providers::ContentBackedResolver;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Already resolved or already in flight.
    Skipped,
    Resolved { content_backed: bool },
    /// Completion arrived for a destroyed session or an older load cycle.
    Discarded,
}

/// Outstanding requests, keyed by (dimension id, path), mapped to the load
/// generation that issued them.
#[derive(Default)]
pub struct ResolutionEngine {
    pending: Mutex<HashMap<(String, String), u64>>,
    calls: AtomicU64,
    stale: AtomicU64,
}

impl ResolutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, dimension_id: &str, path: &str) -> bool {
        self.pending
            .lock()
            .contains_key(&(dimension_id.to_string(), path.to_string()))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of resolver calls issued.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of completions discarded as stale.
    pub fn stale_completions(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Forget every outstanding request. Caches live on the dimensions and
    /// are dropped with them.
    pub fn reset(&self) {
        self.pending.lock().clear();
    }

    fn claim(&self, dimensions: &RwLock<DimensionMap>, dimension_id: &str, path: &str, ticket: Ticket) -> bool {
        let resolved = dimensions
            .read()
            .get(dimension_id)
            .is_none_or(|info| info.resolve_info.is_resolved(path));
        if resolved {
            return false;
        }
        let mut pending = self.pending.lock();
        let key = (dimension_id.to_string(), path.to_string());
        if pending.contains_key(&key) {
            return false;
        }
        pending.insert(key, ticket.generation());
        true
    }

    fn release(&self, dimension_id: &str, path: &str, ticket: Ticket) {
        let mut pending = self.pending.lock();
        let key = (dimension_id.to_string(), path.to_string());
        if pending.get(&key) == Some(&ticket.generation()) {
            pending.remove(&key);
        }
    }

    /// Resolve one path of a dimension.
    pub async fn resolve(
        &self,
        resolver: &dyn ContentBackedResolver,
        dimensions: &RwLock<DimensionMap>,
        lifecycle: &Lifecycle,
        dimension_id: &str,
        path: &str,
    ) -> TaggerResult<ResolveOutcome> {
        let ticket = lifecycle.ticket();
        if !lifecycle.is_current(ticket) {
            return Ok(ResolveOutcome::Discarded);
        }
        if !self.claim(dimensions, dimension_id, path, ticket) {
            return Ok(ResolveOutcome::Skipped);
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        let response = resolver.resolve(dimension_id, path).await;
        let outcome = self.complete(dimensions, lifecycle, dimension_id, path, ticket, response);
        // released only after the answer is recorded, so no caller can slip
        // between the two and issue a second request
        self.release(dimension_id, path, ticket);
        outcome
    }

    fn complete(
        &self,
        dimensions: &RwLock<DimensionMap>,
        lifecycle: &Lifecycle,
        dimension_id: &str,
        path: &str,
        ticket: Ticket,
        response: anyhow::Result<Vec<Entity>>,
    ) -> TaggerResult<ResolveOutcome> {
        if !lifecycle.is_current(ticket) {
            self.stale.fetch_add(1, Ordering::Relaxed);
            debug!(dimension_id, path, "discarding stale resolution");
            return Ok(ResolveOutcome::Discarded);
        }

        let entities = match response {
            Ok(entities) => entities,
            Err(source) => {
                warn!(dimension_id, path, error = %source, "failed to resolve content-backed entity");
                return Err(TaggerError::provider("resolve", format!("{dimension_id}:{path}"), source));
            }
        };

        let confirmed = entities
            .into_iter()
            .find(|entity| entity_path::to_path(entity) == path)
            .map(entity_path::cleaned);
        let content_backed = confirmed.is_some();

        let mut dimensions = dimensions.write();
        match dimensions.get_mut(dimension_id) {
            Some(info) => info.resolve_info.record(path, confirmed),
            None => return Ok(ResolveOutcome::Discarded),
        }
        debug!(dimension_id, path, content_backed, "path resolved");
        Ok(ResolveOutcome::Resolved { content_backed })
    }

    /// Resolve every selected path of every dimension concurrently. Returns
    /// the number of paths newly confirmed as content-backed.
    pub async fn prime(
        &self,
        resolver: &dyn ContentBackedResolver,
        dimensions: &RwLock<DimensionMap>,
        lifecycle: &Lifecycle,
    ) -> usize {
        let targets: Vec<(String, String)> = dimensions
            .read()
            .values()
            .flat_map(|info| {
                info.unresolved_paths()
                    .into_iter()
                    .map(|path| (info.id().to_string(), path))
            })
            .collect();

        let results = join_all(targets.iter().map(|(dimension_id, path)| {
            self.resolve(resolver, dimensions, lifecycle, dimension_id, path)
        }))
        .await;

        results
            .into_iter()
            .filter(|result| matches!(result, Ok(ResolveOutcome::Resolved { content_backed: true })))
            .count()
    }
}
