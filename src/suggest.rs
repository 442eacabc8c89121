//! Search-as-you-type suggestions and free-text entries

use crate::config::TaggerConfig;
use crate::entity_path::{self, PATH_SEPARATOR};
use crate::lifecycle::Lifecycle;
use crate::model::{Dimension, Entity};
use crate::providers::EntitySuggestionProvider;
use crate::scheduler::Debouncer;
use std::time::Duration;
use tracing::{debug, warn};

/// A term is searchable when every `/`-separated part has at least
/// `min_chars` characters and some whitespace token reaches that length.
pub fn is_search_term_ok(term: &str, min_chars: usize) -> bool {
    let parts_ok = term
        .split(PATH_SEPARATOR)
        .all(|part| part.trim().chars().count() >= min_chars);
    let token_ok = term
        .split_whitespace()
        .any(|token| token.chars().count() >= min_chars);
    parts_ok && token_ok
}

pub struct SuggestionSearch {
    debouncer: Debouncer,
    min_chars: usize,
}

impl SuggestionSearch {
    pub fn new(delay: Duration, min_chars: usize) -> Self {
        Self {
            debouncer: Debouncer::new(delay),
            min_chars,
        }
    }

    pub fn from_config(config: &TaggerConfig) -> Self {
        Self::new(config.suggestion_debounce, config.min_token_chars)
    }

    /// Debounced search in one dimension.
    ///
    /// Returns `None` when a newer search for the same dimension superseded
    /// this one or the session moved on. Provider failures yield an empty
    /// list.
    pub async fn search(
        &self,
        provider: &dyn EntitySuggestionProvider,
        lifecycle: &Lifecycle,
        dimension_id: &str,
        term: &str,
    ) -> Option<Vec<Entity>> {
        let ticket = lifecycle.ticket();
        let debounce = self.debouncer.settle(dimension_id).await?;
        if !is_search_term_ok(term, self.min_chars) {
            return Some(Vec::new());
        }

        let response = provider.suggestions(dimension_id, term).await;
        if !lifecycle.is_current(ticket) || !self.debouncer.is_latest(&debounce) {
            debug!(dimension_id, term, "discarding superseded suggestions");
            return None;
        }

        match response {
            Ok(entities) => Some(entities.into_iter().map(entity_path::cleaned).collect()),
            Err(error) => {
                warn!(dimension_id, term, error = %error, "suggestion lookup failed");
                Some(Vec::new())
            }
        }
    }
}

/// Free-text entry for a dimension that accepts one.
pub fn create_search_choice(config: &TaggerConfig, dimension: &Dimension, term: &str) -> Option<Entity> {
    if config.is_excluded(&dimension.id) || dimension.enumerable {
        return None;
    }
    Some(entity_path::from_path(term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoProvider;

    #[async_trait]
    impl EntitySuggestionProvider for EchoProvider {
        async fn suggestions(&self, _dimension_id: &str, query: &str) -> Result<Vec<Entity>> {
            if query.contains("fail") {
                return Err(anyhow!("search backend down"));
            }
            Ok(vec![entity_path::from_path(query).with_children_omitted(true)])
        }
    }

    #[test]
    fn test_search_term_rules() {
        assert!(is_search_term_ok("Sweden", 2));
        assert!(is_search_term_ok("Europe/Sweden", 2));
        assert!(is_search_term_ok("new york", 2));
        assert!(!is_search_term_ok("S", 2));
        assert!(!is_search_term_ok("Europe/S", 2));
        assert!(!is_search_term_ok("a b", 2));
        assert!(!is_search_term_ok("", 2));
    }

    #[test]
    fn test_search_choice_rules() {
        let config = TaggerConfig {
            exclude: vec!["dimension.Excluded".into()],
            ..TaggerConfig::default()
        };
        let mut free = Dimension::new("dimension.Tag", "Tag");
        free.enumerable = false;
        let choice = create_search_choice(&config, &free, "breaking/news").unwrap();
        assert_eq!(entity_path::to_path(&choice), "breaking/news");

        let enumerable = Dimension::new("dimension.Region", "Region");
        assert!(create_search_choice(&config, &enumerable, "x").is_none());

        let mut excluded = Dimension::new("dimension.Excluded", "Excluded");
        excluded.enumerable = false;
        assert!(create_search_choice(&config, &excluded, "x").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_query_supersedes() {
        let search = Arc::new(SuggestionSearch::new(Duration::from_millis(200), 2));
        let lifecycle = Arc::new(Lifecycle::new());

        let first = {
            let (search, lifecycle) = (search.clone(), lifecycle.clone());
            tokio::spawn(async move { search.search(&EchoProvider, &lifecycle, "dimension.Tag", "Swe").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let (search, lifecycle) = (search.clone(), lifecycle.clone());
            tokio::spawn(async move { search.search(&EchoProvider, &lifecycle, "dimension.Tag", "Sweden").await })
        };

        assert!(first.await.unwrap().is_none());
        let results = second.await.unwrap().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].children_omitted.is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_yields_empty() {
        let search = SuggestionSearch::new(Duration::ZERO, 2);
        let lifecycle = Lifecycle::new();
        let results = search
            .search(&EchoProvider, &lifecycle, "dimension.Tag", "fail now")
            .await;
        assert_eq!(results, Some(Vec::new()));
    }
}
