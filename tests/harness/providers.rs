//! Provider wrappers that let tests control completion order

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use taxonomy_tagger::providers::{
    AnnotationProvider, ContentBackedResolver, TaxonomyStructureProvider,
};
use taxonomy_tagger::{AnnotationHit, CatalogProviders, Entity, EntityTree};
use tokio::sync::Semaphore;

/// Holds every call until the test releases a permit.
pub struct Gate {
    permits: Semaphore,
    calls: AtomicUsize,
}

impl Gate {
    fn closed() -> Self {
        Self {
            permits: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    async fn pass(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.permits
            .acquire()
            .await
            .map_err(|_| anyhow!("gate closed"))?
            .forget();
        Ok(())
    }
}

pub struct GatedResolver {
    catalog: Arc<CatalogProviders>,
    gate: Gate,
}

impl GatedResolver {
    pub fn new(catalog: Arc<CatalogProviders>) -> Self {
        Self {
            catalog,
            gate: Gate::closed(),
        }
    }

    pub fn release(&self, count: usize) {
        self.gate.permits.add_permits(count);
    }

    pub fn calls(&self) -> usize {
        self.gate.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentBackedResolver for GatedResolver {
    async fn resolve(&self, dimension_id: &str, path: &str) -> Result<Vec<Entity>> {
        self.gate.pass().await?;
        self.catalog.resolve(dimension_id, path).await
    }
}

pub struct GatedAnnotator {
    catalog: Arc<CatalogProviders>,
    gate: Gate,
}

impl GatedAnnotator {
    pub fn new(catalog: Arc<CatalogProviders>) -> Self {
        Self {
            catalog,
            gate: Gate::closed(),
        }
    }

    pub fn release(&self, count: usize) {
        self.gate.permits.add_permits(count);
    }

    pub fn calls(&self) -> usize {
        self.gate.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnnotationProvider for GatedAnnotator {
    async fn annotate(&self, taxonomy_id: &str, text: &str) -> Result<Vec<AnnotationHit>> {
        self.gate.pass().await?;
        self.catalog.annotate(taxonomy_id, text).await
    }
}

/// Structure provider failing for chosen root ids.
pub struct FlakyStructure {
    catalog: Arc<CatalogProviders>,
    failing: Mutex<Vec<String>>,
}

impl FlakyStructure {
    pub fn new(catalog: Arc<CatalogProviders>) -> Self {
        Self {
            catalog,
            failing: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, root_id: &str) {
        self.failing.lock().push(root_id.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().clear();
    }
}

#[async_trait]
impl TaxonomyStructureProvider for FlakyStructure {
    async fn external_alias(&self, taxonomy_id: &str) -> Result<Option<String>> {
        if self.failing.lock().iter().any(|id| id == taxonomy_id) {
            return Err(anyhow!("alias service unavailable for {taxonomy_id}"));
        }
        self.catalog.external_alias(taxonomy_id).await
    }

    async fn get_structure(&self, root_id: &str, depth: u32) -> Result<EntityTree> {
        if self.failing.lock().iter().any(|id| id == root_id) {
            return Err(anyhow!("structure service unavailable for {root_id}"));
        }
        self.catalog.get_structure(root_id, depth).await
    }
}

/// Structure provider holding fetches of chosen root ids at a gate.
pub struct GatedStructure {
    catalog: Arc<CatalogProviders>,
    held: Mutex<Vec<String>>,
    gate: Gate,
}

impl GatedStructure {
    pub fn new(catalog: Arc<CatalogProviders>) -> Self {
        Self {
            catalog,
            held: Mutex::new(Vec::new()),
            gate: Gate::closed(),
        }
    }

    pub fn hold(&self, root_id: &str) {
        self.held.lock().push(root_id.to_string());
    }

    pub fn release(&self, count: usize) {
        self.gate.permits.add_permits(count);
    }

    /// Number of fetches that reached the gate.
    pub fn held_calls(&self) -> usize {
        self.gate.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaxonomyStructureProvider for GatedStructure {
    async fn external_alias(&self, taxonomy_id: &str) -> Result<Option<String>> {
        self.catalog.external_alias(taxonomy_id).await
    }

    async fn get_structure(&self, root_id: &str, depth: u32) -> Result<EntityTree> {
        let held = self.held.lock().iter().any(|id| id == root_id);
        if held {
            self.gate.pass().await?;
        }
        self.catalog.get_structure(root_id, depth).await
    }
}
