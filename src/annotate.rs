//! Automated annotation runs
//!
//! The document's text is sent to the annotation service once per taxonomy.
//! Hits are merged into the matching dimensions without duplicating paths
//! the editor already selected.

use crate::dimension::DimensionMap;
use crate::error::{TaggerError, TaggerResult};
use crate::lifecycle::Lifecycle;
use crate::model::AnnotationHit;
use crate::providers::{AnnotationProvider, HostDocument};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationOutcome {
    /// Hits were merged; `dimensions` lists the dimensions that changed.
    Applied { added: usize, dimensions: Vec<String> },
    AlreadyRunning,
    /// Results arrived while loading, after teardown, or for an older cycle.
    Discarded,
}

/// Result of one provider round for all taxonomies.
#[derive(Debug)]
pub enum AnnotationRun {
    Hits(Vec<AnnotationHit>),
    AlreadyRunning,
    Discarded,
}

/// Clears the in-progress flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct AnnotationEngine {
    in_progress: AtomicBool,
    error: AtomicBool,
    runs: AtomicU64,
}

impl AnnotationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Set when the last run failed.
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Ask the annotator about `text` for every taxonomy.
    ///
    /// Any single failure fails the whole run. The error flag is reset at the
    /// start of every run.
    pub async fn run(
        &self,
        annotator: &dyn AnnotationProvider,
        lifecycle: &Lifecycle,
        taxonomy_ids: &[String],
        text: &str,
    ) -> TaggerResult<AnnotationRun> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(AnnotationRun::AlreadyRunning);
        }
        let _guard = RunGuard(&self.in_progress);
        self.error.store(false, Ordering::Release);
        self.runs.fetch_add(1, Ordering::Relaxed);

        let ticket = lifecycle.ticket();
        let results = join_all(taxonomy_ids.iter().map(|taxonomy_id| async move {
            annotator
                .annotate(taxonomy_id, text)
                .await
                .map_err(|source| (taxonomy_id.clone(), source))
        }))
        .await;

        if !lifecycle.is_current(ticket) || !lifecycle.is_ready() {
            debug!("discarding annotation results");
            return Ok(AnnotationRun::Discarded);
        }

        let mut hits = Vec::new();
        for result in results {
            match result {
                Ok(batch) => hits.extend(batch),
                Err((taxonomy_id, source)) => {
                    self.error.store(true, Ordering::Release);
                    warn!(taxonomy_id = %taxonomy_id, error = %source, "annotation failed");
                    return Err(TaggerError::provider("annotate", taxonomy_id, source));
                }
            }
        }
        Ok(AnnotationRun::Hits(hits))
    }
}

/// Join the configured text sources in order, skipping missing ones.
pub fn collect_text(host: &dyn HostDocument, sources: &[String]) -> String {
    sources
        .iter()
        .filter_map(|name| host.text_source(name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merge hits into the dimensions. Returns the number of added entities and
/// the ids of the dimensions that changed, in first-change order.
pub fn merge_hits(dimensions: &mut DimensionMap, hits: Vec<AnnotationHit>) -> (usize, Vec<String>) {
    let mut added = 0;
    let mut changed: Vec<String> = Vec::new();
    for hit in hits {
        let Some(info) = dimensions.get_mut(&hit.dimension_id) else {
            debug!(dimension_id = %hit.dimension_id, "skipping hit for unmanaged dimension");
            continue;
        };
        for entity in hit.entities {
            if info.add_entity(entity) {
                added += 1;
                if !changed.iter().any(|id| id == &hit.dimension_id) {
                    changed.push(hit.dimension_id.clone());
                }
            }
        }
    }
    (added, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionInfo;
    use crate::entity_path;
    use crate::model::{Dimension, Entity, Metadata};
    use crate::providers::MemoryHostDocument;
    use anyhow::{Result, anyhow};
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    struct CannedAnnotator;

    #[async_trait]
    impl AnnotationProvider for CannedAnnotator {
        async fn annotate(&self, taxonomy_id: &str, _text: &str) -> Result<Vec<AnnotationHit>> {
            match taxonomy_id {
                "tax.broken" => Err(anyhow!("annotator down")),
                _ => Ok(vec![AnnotationHit {
                    dimension_id: "dimension.Region".into(),
                    entities: vec![entity_path::from_path("Europe/Sweden")],
                }]),
            }
        }
    }

    fn ready_lifecycle() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        let ticket = lifecycle.begin_load().unwrap();
        lifecycle.mark_ready(ticket).unwrap();
        lifecycle
    }

    #[test]
    fn test_collect_text_skips_missing_sources() {
        let host = MemoryHostDocument::new(Metadata::default(), vec![])
            .with_text("title", "Title")
            .with_text("body", "Body");
        let sources = vec!["title".to_string(), "lead".to_string(), "body".to_string()];
        assert_eq!(collect_text(&host, &sources), "Title\nBody");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut dimensions = DimensionMap::new();
        let info = DimensionInfo::new(Dimension::new("dimension.Region", "Region"), 0, vec![]);
        dimensions.insert(info.id().to_string(), info);
        let hits = || {
            vec![
                AnnotationHit {
                    dimension_id: "dimension.Region".into(),
                    entities: vec![
                        entity_path::from_path("Europe/Sweden"),
                        Entity::new("x", "Europe").with_children_omitted(true),
                    ],
                },
                AnnotationHit {
                    dimension_id: "dimension.Unknown".into(),
                    entities: vec![entity_path::from_path("X")],
                },
            ]
        };

        assert_eq!(merge_hits(&mut dimensions, hits()), (2, vec!["dimension.Region".to_string()]));
        assert_eq!(merge_hits(&mut dimensions, hits()), (0, vec![]));
        let model = &dimensions["dimension.Region"].model;
        assert_eq!(model.len(), 2);
        assert!(model[1].children_omitted.is_none());
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_applies_nothing() {
        let engine = AnnotationEngine::new();
        let lifecycle = ready_lifecycle();
        let taxonomies = vec!["tax.places".to_string(), "tax.broken".to_string()];

        let result = engine.run(&CannedAnnotator, &lifecycle, &taxonomies, "text").await;
        assert_matches!(result, Err(TaggerError::Provider { operation: "annotate", .. }));
        assert!(engine.has_error());
        assert!(!engine.in_progress());

        let ok = engine
            .run(&CannedAnnotator, &lifecycle, &taxonomies[..1], "text")
            .await
            .unwrap();
        assert_matches!(ok, AnnotationRun::Hits(hits) if hits.len() == 1);
        assert!(!engine.has_error());
    }

    #[tokio::test]
    async fn test_results_discarded_while_loading() {
        let engine = AnnotationEngine::new();
        let lifecycle = Lifecycle::new();
        lifecycle.begin_load().unwrap();

        let run = engine
            .run(&CannedAnnotator, &lifecycle, &["tax.places".to_string()], "text")
            .await
            .unwrap();
        assert_matches!(run, AnnotationRun::Discarded);
        assert!(!engine.in_progress());
    }
}
