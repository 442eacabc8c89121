pub mod annotate;
pub mod config;
pub mod dimension;
pub mod entity_path;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod providers;
pub mod reconcile;
pub mod resolve;
pub mod scheduler;
pub mod suggest;
pub mod tree;

pub use config::{CliArgs, EvictionPolicy, TaggerConfig};
pub use error::{ERROR_METRICS, ErrorCode, ErrorMetrics, TaggerError, TaggerResult};
pub use logging::{LoggingConfig, init_logging};
pub use model::{AnnotationHit, Attribute, Dimension, Entity, EntityTree, Metadata};
pub use providers::{CatalogProviders, MemoryHostDocument, Providers};
pub use reconcile::{InitReport, MissingTaxonomies, Reconciler, SessionStats};

use anyhow::{Context, Result};
use annotate::AnnotationOutcome;
use serde::Serialize;
use std::sync::Arc;

/// What one command-line run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub metadata: Metadata,
    pub missing: MissingTaxonomies,
    pub auto_selected: Vec<String>,
    pub annotated: usize,
    pub stats: SessionStats,
}

/// Load the catalog and document, synchronize once, and optionally persist
/// the result.
pub async fn run_once(config: TaggerConfig, args: &CliArgs) -> Result<RunReport> {
    let catalog = Arc::new(CatalogProviders::from_file(&args.catalog)?);
    let host = Arc::new(MemoryHostDocument::from_file(&args.document)?);
    let providers = Providers::from_catalog(catalog, host.clone());

    let annotation = config.annotation;
    let session = Reconciler::new(config, providers);
    let report = session.initialize().await?;
    if !report.missing.is_empty() {
        tracing::warn!(
            count = report.missing.count,
            ids = ?report.missing.ids,
            "some taxonomies could not be loaded"
        );
    }

    let annotated = if annotation {
        match session.annotate().await? {
            AnnotationOutcome::Applied { added, .. } => added,
            outcome => {
                tracing::warn!(?outcome, "annotation produced no result");
                0
            }
        }
    } else {
        0
    };

    session.flush();
    let stats = session.stats();
    session.destroy();

    let snapshot = host.snapshot();
    if args.write {
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&args.document, json)
            .with_context(|| format!("failed to write document {:?}", args.document))?;
        tracing::info!(path = %args.document.display(), "document written");
    }

    Ok(RunReport {
        metadata: snapshot.metadata,
        missing: report.missing,
        auto_selected: report.auto_selected,
        annotated,
        stats,
    })
}
