//! Reconciliation engine
//!
//! A [`Reconciler`] owns one tagging session: it loads the taxonomies'
//! dimensions, keeps a working model per dimension, and keeps those models in
//! two-way sync with the host document.
//!
//! Outward: every model mutation goes through this type. A mutation that
//! changes a list marks its dimension dirty; all dimensions dirtied within one
//! scheduling tick are written with a single `set_metadata` followed by one
//! `changed(own id)` notification. The write reads fresh host metadata first,
//! so slots this session does not manage are carried through untouched.
//!
//! Inward: a listener task receives the modifier id of every host change. A
//! foreign id re-reads the managed dimensions from the host. Re-reads never
//! mark anything dirty, so they are never echoed back.

use crate::annotate::{self, AnnotationEngine, AnnotationOutcome, AnnotationRun};
use crate::config::TaggerConfig;
use crate::dimension::{DimensionInfo, DimensionMap, SelectionRules, ToggleOutcome};
use crate::entity_path;
use crate::error::{TaggerError, TaggerResult};
use crate::lifecycle::{Lifecycle, SessionState, Ticket};
use crate::model::{Dimension, Entity, Metadata};
use crate::providers::{Providers, TaxonomyStructureProvider};
use crate::resolve::ResolutionEngine;
use crate::scheduler::{WriteCoalescer, on_next_tick};
use crate::suggest::{self, SuggestionSearch};
use crate::tree::{self, EntityTreeCache, ExpandOutcome, NodeId, NodeView};
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Taxonomies that could not be loaded during the last load cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingTaxonomies {
    pub count: usize,
    pub ids: Vec<String>,
}

impl MissingTaxonomies {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub dimensions: Vec<String>,
    pub missing: MissingTaxonomies,
    /// Dimensions that received their first lookup candidate.
    pub auto_selected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub state: String,
    pub dimensions: usize,
    pub host_writes: u64,
    pub inbound_rereads: u64,
    pub ignored_own_changes: u64,
    pub resolve_calls: u64,
    pub pending_resolutions: usize,
    pub stale_completions: u64,
    pub annotate_runs: u64,
    pub missing_taxonomies: usize,
}

#[derive(Default)]
struct SyncStats {
    host_writes: AtomicU64,
    inbound_rereads: AtomicU64,
    ignored_own_changes: AtomicU64,
}

struct Inner {
    config: TaggerConfig,
    rules: SelectionRules,
    modifier_id: String,
    providers: Providers,
    lifecycle: Lifecycle,
    dimensions: RwLock<DimensionMap>,
    trees: RwLock<HashMap<String, Arc<Mutex<EntityTreeCache>>>>,
    missing: RwLock<MissingTaxonomies>,
    coalescer: WriteCoalescer,
    resolution: ResolutionEngine,
    annotation: AnnotationEngine,
    search: SuggestionSearch,
    stats: SyncStats,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one tagging session. Cloning shares the session.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(config: TaggerConfig, providers: Providers) -> Self {
        let modifier_id = config
            .modifier_id
            .clone()
            .unwrap_or_else(|| format!("taxonomy-tagger-{}", Uuid::new_v4()));
        let inner = Inner {
            rules: SelectionRules::from(&config),
            search: SuggestionSearch::from_config(&config),
            config,
            modifier_id,
            providers,
            lifecycle: Lifecycle::new(),
            dimensions: RwLock::new(DimensionMap::new()),
            trees: RwLock::new(HashMap::new()),
            missing: RwLock::new(MissingTaxonomies::default()),
            coalescer: WriteCoalescer::new(),
            resolution: ResolutionEngine::new(),
            annotation: AnnotationEngine::new(),
            stats: SyncStats::default(),
            listener: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Load the dimensions of every taxonomy and start syncing with the host.
    ///
    /// Individual taxonomy failures are reported in the returned
    /// [`InitReport`] and never abort the others.
    pub async fn initialize(&self) -> TaggerResult<InitReport> {
        let ticket = self.inner.lifecycle.begin_load()?;
        self.inner.load(ticket).await
    }

    /// Start a new load cycle. Completions of the previous cycle are
    /// discarded; pending local edits are written first.
    pub async fn reload(&self) -> TaggerResult<InitReport> {
        self.inner.flush_writes();
        let ticket = self.inner.lifecycle.begin_load()?;
        self.inner.resolution.reset();
        self.inner.trees.write().clear();
        info!(modifier_id = %self.inner.modifier_id, "reloading tagging session");
        self.inner.load(ticket).await
    }

    /// Tear the session down. Pending writes are dropped and the listener
    /// stops. Returns false when already destroyed.
    pub fn destroy(&self) -> bool {
        if !self.inner.lifecycle.destroy() {
            return false;
        }
        let dropped = self.inner.coalescer.drain();
        self.inner.resolution.reset();
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        info!(
            modifier_id = %self.inner.modifier_id,
            dropped_writes = dropped.len(),
            "tagging session destroyed"
        );
        true
    }

    /// Write pending dimension changes now. Returns the number of dimensions
    /// written.
    pub fn flush(&self) -> usize {
        self.inner.flush_writes()
    }

    // =========================================================================
    // MODEL MUTATION
    // =========================================================================

    /// Select or deselect a node of the dimension's tree.
    pub fn toggle_node(&self, dimension_id: &str, node: NodeId) -> TaggerResult<ToggleOutcome> {
        let (view, path_entity) = {
            let handle = self.inner.tree(dimension_id)?;
            let cache = handle.lock();
            let view = cache.node(node).ok_or_else(|| TaggerError::UnknownNode {
                dimension_id: dimension_id.to_string(),
                node,
            })?;
            (view, cache.path_entity(node)?)
        };
        let rules = self.inner.rules;
        let outcome = self
            .inner
            .mutate(dimension_id, |info| info.toggle(&view, path_entity, rules))?;
        if outcome.changed() {
            self.inner.providers.ui.dismiss_transient(None);
        }
        Ok(outcome)
    }

    /// Append an entity unless its path is already selected.
    pub fn add_entity(&self, dimension_id: &str, entity: Entity) -> TaggerResult<bool> {
        let added = self.inner.mutate(dimension_id, |info| info.add_entity(entity))?;
        if added {
            self.inner.providers.ui.dismiss_transient(None);
        }
        Ok(added)
    }

    pub fn remove_entity(&self, dimension_id: &str, path: &str) -> TaggerResult<Option<Entity>> {
        self.inner.mutate(dimension_id, |info| info.remove_path(path))
    }

    pub fn move_entity(&self, dimension_id: &str, from: usize, to: usize) -> TaggerResult<bool> {
        self.inner
            .mutate(dimension_id, |info| info.move_entity(from, to))
    }

    pub fn clear(&self, dimension_id: &str) -> TaggerResult<bool> {
        self.inner.mutate(dimension_id, DimensionInfo::clear)
    }

    pub fn select_lookup_item(&self, dimension_id: &str, item: Entity) -> TaggerResult<bool> {
        self.inner
            .mutate(dimension_id, |info| info.select_lookup_item(item))
    }

    pub fn remove_lookup_item(&self, dimension_id: &str, item: &Entity) -> TaggerResult<bool> {
        self.inner
            .mutate(dimension_id, |info| info.remove_lookup_item(item))
    }

    /// Replace a dimension's whole selection list.
    pub fn update_model(&self, dimension_id: &str, entities: Vec<Entity>) -> TaggerResult<bool> {
        self.inner
            .mutate(dimension_id, |info| info.replace_model(entities))
    }

    // =========================================================================
    // TREE & SEARCH
    // =========================================================================

    /// Fetch the dimension's browsable tree.
    pub async fn load_tree(&self, dimension_id: &str) -> TaggerResult<bool> {
        self.inner.lifecycle.ensure_alive()?;
        let handle = self.inner.tree(dimension_id)?;
        tree::load_root(
            &handle,
            self.inner.providers.structure.as_ref(),
            &self.inner.lifecycle,
            self.inner.config.tree_preload_depth,
        )
        .await
    }

    pub async fn expand_node(&self, dimension_id: &str, node: NodeId) -> TaggerResult<ExpandOutcome> {
        self.inner.lifecycle.ensure_alive()?;
        let handle = self.inner.tree(dimension_id)?;
        tree::expand(
            &handle,
            self.inner.providers.structure.as_ref(),
            &self.inner.lifecycle,
            node,
        )
        .await
    }

    pub fn collapse_node(&self, dimension_id: &str, node: NodeId) -> TaggerResult<()> {
        self.inner.tree(dimension_id)?.lock().collapse(node)
    }

    pub fn tree_node(&self, dimension_id: &str, node: NodeId) -> Option<NodeView> {
        self.inner.tree(dimension_id).ok()?.lock().node(node)
    }

    pub fn find_node(&self, dimension_id: &str, path: &str) -> Option<NodeId> {
        self.inner.tree(dimension_id).ok()?.lock().find(path)
    }

    /// The dimension's browsable tree as loaded so far.
    pub fn tree_snapshot(&self, dimension_id: &str) -> Option<Vec<Entity>> {
        Some(self.inner.tree(dimension_id).ok()?.lock().snapshot())
    }

    /// Debounced suggestion search. `Ok(None)` means the query was superseded.
    pub async fn search(&self, dimension_id: &str, term: &str) -> TaggerResult<Option<Vec<Entity>>> {
        self.inner.lifecycle.ensure_alive()?;
        self.inner.require_dimension(dimension_id)?;
        let provider = match (&self.inner.providers.suggestions, self.inner.config.auto_completion) {
            (Some(provider), true) => provider.clone(),
            _ => return Ok(Some(Vec::new())),
        };
        Ok(self
            .inner
            .search
            .search(provider.as_ref(), &self.inner.lifecycle, dimension_id, term)
            .await)
    }

    /// Free-text entry for `term`, when the dimension accepts one.
    pub fn create_search_choice(&self, dimension_id: &str, term: &str) -> TaggerResult<Option<Entity>> {
        let dimensions = self.inner.dimensions.read();
        let info = dimensions
            .get(dimension_id)
            .ok_or_else(|| TaggerError::UnknownDimension(dimension_id.to_string()))?;
        Ok(suggest::create_search_choice(&self.inner.config, &info.dimension, term))
    }

    // =========================================================================
    // ANNOTATION
    // =========================================================================

    /// Run automated annotation over the configured text sources and merge
    /// the hits into the models.
    pub async fn annotate(&self) -> TaggerResult<AnnotationOutcome> {
        let inner = &self.inner;
        inner.ensure_editable()?;
        if !inner.config.annotation {
            return Err(TaggerError::Config("annotation is disabled".to_string()));
        }
        let annotator = inner
            .providers
            .annotator
            .clone()
            .ok_or_else(|| TaggerError::Config("no annotation provider configured".to_string()))?;

        let host = inner.providers.host.as_ref();
        let text = annotate::collect_text(host, &inner.config.texts_to_annotate);
        let taxonomy_ids = host.taxonomy_ids();

        let hits = match inner
            .annotation
            .run(annotator.as_ref(), &inner.lifecycle, &taxonomy_ids, &text)
            .await?
        {
            AnnotationRun::Hits(hits) => hits,
            AnnotationRun::AlreadyRunning => return Ok(AnnotationOutcome::AlreadyRunning),
            AnnotationRun::Discarded => return Ok(AnnotationOutcome::Discarded),
        };

        let (added, changed, schedule) = {
            let mut dimensions = inner.dimensions.write();
            let (added, changed) = annotate::merge_hits(&mut dimensions, hits);
            let schedule = changed
                .iter()
                .fold(false, |schedule, dimension_id| inner.coalescer.mark(dimension_id) || schedule);
            (added, changed, schedule)
        };
        if schedule {
            inner.schedule_flush();
        }
        debug!(added, dimensions = changed.len(), "annotation hits merged");

        inner.prime().await;
        Ok(AnnotationOutcome::Applied {
            added,
            dimensions: changed,
        })
    }

    pub fn annotation_error(&self) -> bool {
        self.inner.annotation.has_error()
    }

    pub fn annotation_in_progress(&self) -> bool {
        self.inner.annotation.in_progress()
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.inner.lifecycle.state()
    }

    pub fn modifier_id(&self) -> &str {
        &self.inner.modifier_id
    }

    pub fn config(&self) -> &TaggerConfig {
        &self.inner.config
    }

    pub fn dimension(&self, dimension_id: &str) -> Option<DimensionInfo> {
        self.inner.dimensions.read().get(dimension_id).cloned()
    }

    pub fn dimensions(&self) -> Vec<DimensionInfo> {
        self.inner.dimensions.read().values().cloned().collect()
    }

    pub fn model(&self, dimension_id: &str) -> Option<Vec<Entity>> {
        self.inner
            .dimensions
            .read()
            .get(dimension_id)
            .map(|info| info.model.clone())
    }

    /// Content-backed attributes known for a selection.
    pub fn content_backed(&self, dimension_id: &str, entity: &Entity) -> Option<Entity> {
        self.inner
            .dimensions
            .read()
            .get(dimension_id)?
            .content_backed(entity)
            .cloned()
    }

    pub fn missing_taxonomies(&self) -> MissingTaxonomies {
        self.inner.missing.read().clone()
    }

    /// Whether editors must fill the dimension. Without an explicit list every
    /// dimension is required.
    pub fn is_dimension_required(&self, dimension_id: &str) -> bool {
        self.inner
            .config
            .dimensions
            .as_ref()
            .is_none_or(|required| required.iter().any(|id| id == dimension_id))
    }

    pub fn has_pending_writes(&self) -> bool {
        self.inner.coalescer.is_pending()
    }

    pub fn stats(&self) -> SessionStats {
        let inner = &self.inner;
        SessionStats {
            state: inner.lifecycle.state().to_string(),
            dimensions: inner.dimensions.read().len(),
            host_writes: inner.stats.host_writes.load(Ordering::Relaxed),
            inbound_rereads: inner.stats.inbound_rereads.load(Ordering::Relaxed),
            ignored_own_changes: inner.stats.ignored_own_changes.load(Ordering::Relaxed),
            resolve_calls: inner.resolution.calls(),
            pending_resolutions: inner.resolution.pending_count(),
            stale_completions: inner.resolution.stale_completions(),
            annotate_runs: inner.annotation.runs(),
            missing_taxonomies: inner.missing.read().count,
        }
    }
}

impl Inner {
    async fn load(self: &Arc<Self>, ticket: Ticket) -> TaggerResult<InitReport> {
        let host = self.providers.host.clone();
        let receiver = host.subscribe();

        let taxonomy_ids = self
            .config
            .taxonomy_ids
            .clone()
            .unwrap_or_else(|| host.taxonomy_ids());
        let structure = self.providers.structure.as_ref();
        let loaded = join_all(
            taxonomy_ids
                .iter()
                .map(|taxonomy_id| load_taxonomy(structure, taxonomy_id)),
        )
        .await;
        self.ensure_current(ticket)?;

        let mut missing = MissingTaxonomies::default();
        let mut merged: IndexMap<String, Dimension> = IndexMap::new();
        for (taxonomy_id, result) in taxonomy_ids.iter().zip(loaded) {
            match result {
                Ok(dimensions) => {
                    for dimension in dimensions {
                        merged.entry(dimension.id.clone()).or_insert(dimension);
                    }
                }
                Err(error) => {
                    error.track("load_taxonomy");
                    warn!(taxonomy_id = %taxonomy_id, error = %error, "taxonomy not loaded");
                    missing.ids.push(taxonomy_id.clone());
                }
            }
        }
        missing.count = missing.ids.len();
        if !missing.is_empty() {
            warn!(count = missing.count, ids = ?missing.ids, "missing taxonomies");
        }

        let mut snapshot = host.metadata();
        let mut dimensions = DimensionMap::new();
        for (dimension_id, dimension) in merged {
            let index = match snapshot.position(&dimension_id) {
                Some(index) => index,
                None => {
                    snapshot.dimensions.push(Dimension {
                        entities: Vec::new(),
                        ..dimension.clone()
                    });
                    snapshot.dimensions.len() - 1
                }
            };
            let model = snapshot.dimensions[index]
                .entities
                .iter()
                .cloned()
                .map(entity_path::cleaned)
                .collect();
            let dimension = Dimension {
                entities: Vec::new(),
                ..dimension
            };
            dimensions.insert(dimension_id, DimensionInfo::new(dimension, index, model));
        }

        let auto_selected = self.load_lookups(&mut dimensions, ticket).await?;

        let managed: Vec<String> = dimensions.keys().cloned().collect();
        *self.dimensions.write() = dimensions;
        *self.missing.write() = missing.clone();
        {
            let mut trees = self.trees.write();
            trees.retain(|dimension_id, _| managed.contains(dimension_id));
        }

        if !auto_selected.is_empty() {
            let mut metadata = host.metadata();
            {
                let dimensions = self.dimensions.read();
                for dimension_id in &auto_selected {
                    if let Some(info) = dimensions.get(dimension_id) {
                        write_slot(&mut metadata, info);
                    }
                }
            }
            self.write_host(metadata);
        }

        self.attach_listener(receiver);
        self.lifecycle.mark_ready(ticket)?;
        info!(
            modifier_id = %self.modifier_id,
            dimensions = managed.len(),
            missing = missing.count,
            "tagging session ready"
        );

        self.prime().await;

        Ok(InitReport {
            dimensions: managed,
            missing,
            auto_selected,
        })
    }

    /// Fetch lookup candidates and auto-select the first one in empty
    /// dimensions. Returns the ids of the dimensions that got a selection.
    async fn load_lookups(&self, dimensions: &mut DimensionMap, ticket: Ticket) -> TaggerResult<Vec<String>> {
        let Some(provider) = self.providers.lookups.clone() else {
            return Ok(Vec::new());
        };
        let targets: Vec<String> = dimensions
            .values()
            .filter(|info| self.config.is_lookup_field(&info.dimension.name))
            .map(|info| info.id().to_string())
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(
            targets
                .iter()
                .map(|dimension_id| provider.candidates(dimension_id)),
        )
        .await;
        self.ensure_current(ticket)?;

        let mut auto_selected = Vec::new();
        for (dimension_id, result) in targets.into_iter().zip(results) {
            let Some(info) = dimensions.get_mut(&dimension_id) else {
                continue;
            };
            match result {
                Ok(candidates) => info.set_lookups(candidates),
                Err(error) => {
                    warn!(dimension_id = %dimension_id, error = %error, "failed to load lookup candidates");
                    continue;
                }
            }
            if info.auto_select_lookup() {
                debug!(dimension_id = %dimension_id, "auto-selected lookup candidate");
                auto_selected.push(dimension_id);
            }
        }
        Ok(auto_selected)
    }

    fn ensure_current(&self, ticket: Ticket) -> TaggerResult<()> {
        self.lifecycle.ensure_alive()?;
        if self.lifecycle.is_current(ticket) {
            Ok(())
        } else {
            Err(TaggerError::Stale)
        }
    }

    fn ensure_editable(&self) -> TaggerResult<()> {
        self.lifecycle.ensure_alive()?;
        if self.config.editable {
            Ok(())
        } else {
            Err(TaggerError::ReadOnly)
        }
    }

    fn require_dimension(&self, dimension_id: &str) -> TaggerResult<()> {
        if self.dimensions.read().contains_key(dimension_id) {
            Ok(())
        } else {
            Err(TaggerError::UnknownDimension(dimension_id.to_string()))
        }
    }

    fn tree(&self, dimension_id: &str) -> TaggerResult<Arc<Mutex<EntityTreeCache>>> {
        self.require_dimension(dimension_id)?;
        let mut trees = self.trees.write();
        let handle = trees
            .entry(dimension_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EntityTreeCache::new(dimension_id))));
        Ok(handle.clone())
    }

    /// Apply `change` to one dimension. A changed list is scheduled for write
    /// and new paths are sent for resolution.
    fn mutate<R>(
        self: &Arc<Self>,
        dimension_id: &str,
        change: impl FnOnce(&mut DimensionInfo) -> R,
    ) -> TaggerResult<R> {
        self.ensure_editable()?;
        let (result, added, schedule) = {
            let mut dimensions = self.dimensions.write();
            let info = dimensions
                .get_mut(dimension_id)
                .ok_or_else(|| TaggerError::UnknownDimension(dimension_id.to_string()))?;
            let before = info.model.clone();
            let result = change(info);
            if info.model == before {
                return Ok(result);
            }
            let added: Vec<String> = info
                .model
                .iter()
                .filter(|entity| !before.iter().any(|old| entity_path::same_path(old, entity)))
                .map(entity_path::to_path)
                .collect();
            // marked under the lock so a concurrent re-read sees the edit as pending
            let schedule = self.coalescer.mark(dimension_id);
            (result, added, schedule)
        };

        if schedule {
            self.schedule_flush();
        }
        if !added.is_empty() {
            self.spawn_resolution(dimension_id, added);
        }
        Ok(result)
    }

    fn schedule_flush(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        on_next_tick(move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush_writes();
            }
        });
    }

    /// Write every dirty dimension in one host update.
    ///
    /// Extra dimensions that are not dirty are realigned with the fresh host
    /// metadata, where content categorization may have changed them.
    fn flush_writes(&self) -> usize {
        let mut dimensions = self.dimensions.write();
        let dirty = self.coalescer.drain();
        if dirty.is_empty() || self.lifecycle.is_destroyed() {
            return 0;
        }

        let mut metadata = self.providers.host.metadata();
        for info in dimensions.values_mut() {
            let id = info.id();
            if !self.config.is_extra_dimension(id) || dirty.iter().any(|dirty| dirty == id) {
                continue;
            }
            let entities = metadata
                .dimension(id)
                .map(|dimension| dimension.entities.clone())
                .unwrap_or_default();
            if info.replace_model(entities) {
                debug!(dimension_id = %info.id(), "extra dimension realigned with host");
            }
        }
        for dimension_id in &dirty {
            if let Some(info) = dimensions.get(dimension_id) {
                write_slot(&mut metadata, info);
            }
        }
        // the host is updated before re-reads may run again
        self.write_host(metadata);
        drop(dimensions);
        debug!(dimensions = ?dirty, "flushed dimension changes");
        dirty.len()
    }

    fn write_host(&self, metadata: Metadata) {
        let host = &self.providers.host;
        host.set_metadata(metadata);
        host.changed(&self.modifier_id);
        self.stats.host_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_external_change(self: &Arc<Self>, modifier_id: &str) {
        if modifier_id == self.modifier_id {
            self.stats.ignored_own_changes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        debug!(modifier_id, "host changed externally");
        self.reread_from_host();
    }

    /// Overwrite every model with the host's current entities. Dimensions
    /// with a pending local write keep their model; the flush carries it.
    fn reread_from_host(self: &Arc<Self>) {
        if self.lifecycle.is_destroyed() {
            return;
        }
        let metadata = self.providers.host.metadata();
        let mut grown = false;
        {
            let mut dimensions = self.dimensions.write();
            for info in dimensions.values_mut() {
                if self.coalescer.is_dirty(info.id()) {
                    debug!(dimension_id = %info.id(), "keeping pending local edit over re-read");
                    continue;
                }
                let entities = metadata
                    .dimension(info.id())
                    .map(|dimension| dimension.entities.clone())
                    .unwrap_or_default();
                if entities.is_empty() && !info.lookups.is_empty() {
                    continue;
                }
                if info.replace_model(entities) && !info.unresolved_paths().is_empty() {
                    grown = true;
                }
            }
        }
        self.stats.inbound_rereads.fetch_add(1, Ordering::Relaxed);
        if grown {
            self.spawn_prime();
        }
    }

    fn attach_listener(self: &Arc<Self>, receiver: broadcast::Receiver<String>) {
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let token = self.lifecycle.token();
        *listener = Some(tokio::spawn(listen(weak, receiver, token)));
    }

    async fn prime(&self) {
        if let Some(resolver) = self.providers.resolver.clone() {
            self.resolution
                .prime(resolver.as_ref(), &self.dimensions, &self.lifecycle)
                .await;
        }
    }

    fn spawn_prime(self: &Arc<Self>) {
        if self.providers.resolver.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = self.clone();
        handle.spawn(async move { inner.prime().await });
    }

    fn spawn_resolution(self: &Arc<Self>, dimension_id: &str, paths: Vec<String>) {
        let Some(resolver) = self.providers.resolver.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = self.clone();
        let dimension_id = dimension_id.to_string();
        handle.spawn(async move {
            for path in paths {
                // failures are logged by the engine and retried on the next trigger
                let _ = inner
                    .resolution
                    .resolve(resolver.as_ref(), &inner.dimensions, &inner.lifecycle, &dimension_id, &path)
                    .await;
            }
        });
    }
}

async fn listen(
    inner: Weak<Inner>,
    mut receiver: broadcast::Receiver<String>,
    token: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            message = receiver.recv() => {
                let Some(session) = inner.upgrade() else { break };
                match message {
                    Ok(modifier_id) => session.handle_external_change(&modifier_id),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change listener lagged, re-reading host");
                        session.reread_from_host();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("change listener stopped");
}

async fn load_taxonomy(
    structure: &dyn TaxonomyStructureProvider,
    taxonomy_id: &str,
) -> TaggerResult<Vec<Dimension>> {
    let alias = structure
        .external_alias(taxonomy_id)
        .await
        .map_err(|source| TaggerError::provider("external_alias", taxonomy_id, source))?
        .ok_or_else(|| TaggerError::MissingAlias {
            taxonomy_id: taxonomy_id.to_string(),
        })?;
    let tree = structure
        .get_structure(&alias, 0)
        .await
        .map_err(|source| TaggerError::provider("get_structure", taxonomy_id, source))?;
    debug!(taxonomy_id, alias = %alias, dimensions = tree.dimensions.len(), "taxonomy loaded");
    Ok(tree.dimensions)
}

/// Copy a dimension's model into its host slot, appending the slot if the
/// host no longer has it.
fn write_slot(metadata: &mut Metadata, info: &DimensionInfo) {
    let entities: Vec<Entity> = info.model.iter().cloned().map(entity_path::cleaned).collect();
    let hinted = metadata
        .dimensions
        .get(info.dimension_index)
        .is_some_and(|slot| slot.id == info.id());
    let index = if hinted {
        Some(info.dimension_index)
    } else {
        metadata.position(info.id())
    };
    match index {
        Some(index) => metadata.dimensions[index].entities = entities,
        None => metadata.dimensions.push(Dimension {
            entities,
            ..info.dimension.clone()
        }),
    }
}
