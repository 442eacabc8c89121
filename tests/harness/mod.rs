//! Test harness for tagging sessions
//!
//! Provides:
//! - A fixture catalog with two usable taxonomies and one without an alias
//! - Gated and flaky provider wrappers for ordering-sensitive tests
//! - Session builders wired to an in-memory host document
#![allow(dead_code)]

pub mod fixtures;
pub mod providers;

pub use fixtures::{
    CATEGORY, REGION, TAG, fixture_catalog, fixture_document, region_path, session,
    session_with_providers,
};
pub use providers::{FlakyStructure, GatedAnnotator, GatedResolver, GatedStructure};

use std::time::Duration;

/// Poll `condition` until it holds, giving spawned tasks time to run.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Let every task that is ready to run make progress.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
