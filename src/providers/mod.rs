//! Capability interfaces consumed by the tagging core
//!
//! Transport and wire formats live behind these traits:
//! - Taxonomy structure and alias lookup
//! - Entity suggestions for search-as-you-type
//! - Content-backed entity resolution
//! - Free-text annotation
//! - Lookup candidates for empty dimensions
//! - The host document owning the canonical metadata
//! - UI adapter for transient element dismissal
//!
//! Usage:
//! ```rust,ignore
//! let providers = Providers::builder(structure, host)
//!     .suggestions(catalog.clone())
//!     .resolver(catalog.clone())
//!     .annotator(catalog.clone())
//!     .lookups(catalog)
//!     .build();
//! let session = Reconciler::new(config, providers);
//! ```

use crate::model::{AnnotationHit, Entity, EntityTree, Metadata};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

mod catalog;
mod memory;

pub use catalog::{Catalog, CatalogProviders, CatalogTaxonomy};
pub use memory::{DocumentSnapshot, MemoryHostDocument, NoopUi, RecordingUi};

// =============================================================================
// PROVIDER TRAITS
// =============================================================================

#[async_trait]
pub trait TaxonomyStructureProvider: Send + Sync {
    /// External id alias under which the taxonomy's structure is published.
    /// `None` when the taxonomy has no alias and cannot be used.
    async fn external_alias(&self, taxonomy_id: &str) -> Result<Option<String>>;

    /// Structure below `root_id`, `depth` levels deep.
    async fn get_structure(&self, root_id: &str, depth: u32) -> Result<EntityTree>;
}

#[async_trait]
pub trait EntitySuggestionProvider: Send + Sync {
    async fn suggestions(&self, dimension_id: &str, query: &str) -> Result<Vec<Entity>>;
}

#[async_trait]
pub trait ContentBackedResolver: Send + Sync {
    /// Entities the content store knows for `path` in the dimension. The core
    /// treats the path as content-backed only when an entity with an equal
    /// path is returned.
    async fn resolve(&self, dimension_id: &str, path: &str) -> Result<Vec<Entity>>;
}

#[async_trait]
pub trait AnnotationProvider: Send + Sync {
    async fn annotate(&self, taxonomy_id: &str, text: &str) -> Result<Vec<AnnotationHit>>;
}

#[async_trait]
pub trait LookupCandidateProvider: Send + Sync {
    async fn candidates(&self, dimension_id: &str) -> Result<Vec<Entity>>;
}

/// The externally-owned document whose metadata the core keeps in sync.
pub trait HostDocument: Send + Sync {
    fn metadata(&self) -> Metadata;

    fn set_metadata(&self, metadata: Metadata);

    /// Announce a change made by `modifier_id` to every subscriber.
    fn changed(&self, modifier_id: &str);

    /// Receive the modifier id of every change notification.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    fn taxonomy_ids(&self) -> Vec<String>;

    /// Named text source used as annotation input.
    fn text_source(&self, name: &str) -> Option<String>;
}

pub trait UiAdapter: Send + Sync {
    /// Dismiss open transient UI elements except `keep`.
    fn dismiss_transient(&self, keep: Option<&str>);
}

// =============================================================================
// PROVIDER BUNDLE
// =============================================================================

#[derive(Clone)]
pub struct Providers {
    pub structure: Arc<dyn TaxonomyStructureProvider>,
    pub suggestions: Option<Arc<dyn EntitySuggestionProvider>>,
    pub resolver: Option<Arc<dyn ContentBackedResolver>>,
    pub annotator: Option<Arc<dyn AnnotationProvider>>,
    pub lookups: Option<Arc<dyn LookupCandidateProvider>>,
    pub host: Arc<dyn HostDocument>,
    pub ui: Arc<dyn UiAdapter>,
}

impl Providers {
    pub fn builder(
        structure: Arc<dyn TaxonomyStructureProvider>,
        host: Arc<dyn HostDocument>,
    ) -> ProvidersBuilder {
        ProvidersBuilder {
            providers: Providers {
                structure,
                suggestions: None,
                resolver: None,
                annotator: None,
                lookups: None,
                host,
                ui: Arc::new(NoopUi),
            },
        }
    }

    /// Every capability served by one catalog.
    pub fn from_catalog(catalog: Arc<CatalogProviders>, host: Arc<dyn HostDocument>) -> Self {
        Providers::builder(catalog.clone(), host)
            .suggestions(catalog.clone())
            .resolver(catalog.clone())
            .annotator(catalog.clone())
            .lookups(catalog)
            .build()
    }
}

pub struct ProvidersBuilder {
    providers: Providers,
}

impl ProvidersBuilder {
    pub fn suggestions(mut self, provider: Arc<dyn EntitySuggestionProvider>) -> Self {
        self.providers.suggestions = Some(provider);
        self
    }

    pub fn resolver(mut self, provider: Arc<dyn ContentBackedResolver>) -> Self {
        self.providers.resolver = Some(provider);
        self
    }

    pub fn annotator(mut self, provider: Arc<dyn AnnotationProvider>) -> Self {
        self.providers.annotator = Some(provider);
        self
    }

    pub fn lookups(mut self, provider: Arc<dyn LookupCandidateProvider>) -> Self {
        self.providers.lookups = Some(provider);
        self
    }

    pub fn ui(mut self, ui: Arc<dyn UiAdapter>) -> Self {
        self.providers.ui = ui;
        self
    }

    pub fn build(self) -> Providers {
        self.providers
    }
}
