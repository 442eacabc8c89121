//! Two-way synchronization with the host document
//!
//! These tests verify:
//! - Coalesced outward writes (one write per scheduling tick)
//! - Inbound re-reads on foreign changes and no echo writes
//! - Pending local edits survive a foreign change
//! - Selection rules through the tree
//! - Read-only and destroyed sessions

mod harness;

use assert_matches::assert_matches;
use harness::*;
use std::sync::Arc;
use taxonomy_tagger::dimension::ToggleOutcome;
use taxonomy_tagger::providers::{HostDocument, RecordingUi};
use taxonomy_tagger::{
    CatalogProviders, Dimension, EvictionPolicy, Metadata, Providers, TaggerConfig, TaggerError,
};

const OWN_ID: &str = "tagger-under-test";

fn config() -> TaggerConfig {
    TaggerConfig {
        modifier_id: Some(OWN_ID.into()),
        tree_preload_depth: 2,
        ..TaggerConfig::default()
    }
}

#[tokio::test]
async fn test_changes_in_one_tick_write_once() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();
    assert_eq!(host.write_count(), 0);

    session.add_entity(REGION, region_path("Europe/Sweden")).unwrap();
    session.add_entity(CATEGORY, region_path("Sports/Football")).unwrap();
    session.add_entity(REGION, region_path("Asia")).unwrap();
    assert!(session.has_pending_writes());

    assert!(eventually(|| host.write_count() > 0).await);
    settle().await;

    assert_eq!(host.write_count(), 1);
    assert_eq!(host.changes_by(OWN_ID), 1);
    let written = host.metadata();
    assert_eq!(written.dimension(REGION).unwrap().entities.len(), 2);
    assert_eq!(written.dimension(CATEGORY).unwrap().entities.len(), 1);
    assert_eq!(session.stats().host_writes, 1);
}

#[tokio::test]
async fn test_unchanged_model_is_not_written() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();

    assert!(session.add_entity(REGION, region_path("Asia")).unwrap());
    session.flush();
    assert_eq!(host.write_count(), 1);

    assert!(!session.add_entity(REGION, region_path("Asia")).unwrap());
    assert!(!session.clear(CATEGORY).unwrap());
    assert!(!session.has_pending_writes());
    assert_eq!(session.flush(), 0);
    assert_eq!(host.write_count(), 1);
}

#[tokio::test]
async fn test_foreign_change_updates_model_without_echo() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();

    host.edit_as("another-editor", |metadata| {
        metadata.dimensions.push(
            Dimension::new(REGION, "Region").with_entities(vec![region_path("Asia/Japan")]),
        );
    });

    assert!(eventually(|| session.model(REGION).unwrap().len() == 1).await);
    settle().await;
    assert_eq!(session.model(REGION).unwrap(), vec![region_path("Asia/Japan")]);
    assert_eq!(session.stats().inbound_rereads, 1);
    assert_eq!(host.write_count(), 0);
    assert!(!session.has_pending_writes());
}

#[tokio::test]
async fn test_foreign_change_keeps_pending_local_edit() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();

    session.add_entity(REGION, region_path("Asia/Japan")).unwrap();
    // arrives before the scheduled write has run
    host.edit_as("another-editor", |metadata| {
        metadata.dimensions.push(
            Dimension::new(CATEGORY, "Category")
                .with_entities(vec![region_path("Sports/Football")]),
        );
    });

    assert!(eventually(|| session.stats().inbound_rereads == 1 && host.write_count() >= 1).await);
    settle().await;
    session.flush();

    assert_eq!(session.model(REGION).unwrap(), vec![region_path("Asia/Japan")]);
    assert_eq!(session.model(CATEGORY).unwrap().len(), 1);
    let written = host.metadata();
    assert_eq!(written.dimension(REGION).unwrap().entities, vec![region_path("Asia/Japan")]);
    assert_eq!(written.dimension(CATEGORY).unwrap().entities.len(), 1);
    assert!(!session.has_pending_writes());
}

#[tokio::test]
async fn test_own_change_is_not_reread() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();

    host.edit_as(OWN_ID, |metadata| {
        metadata.dimensions.push(
            Dimension::new(REGION, "Region").with_entities(vec![region_path("Asia/Japan")]),
        );
    });

    assert!(eventually(|| session.stats().ignored_own_changes == 1).await);
    assert!(session.model(REGION).unwrap().is_empty());
    assert_eq!(session.stats().inbound_rereads, 0);
}

#[tokio::test]
async fn test_reread_keeps_lookup_selection_when_host_is_empty() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let config = TaggerConfig {
        lookup_fields: vec!["Region".into()],
        ..config()
    };
    let session = session(config, host.clone());
    session.initialize().await.unwrap();
    assert_eq!(session.model(REGION).unwrap().len(), 1);

    host.edit_as("another-editor", |metadata| {
        metadata.dimensions.clear();
    });

    assert!(eventually(|| session.stats().inbound_rereads == 1).await);
    assert_eq!(session.model(REGION).unwrap()[0].name, "Global");
}

#[tokio::test]
async fn test_capped_dimension_evicts_oldest() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let config = TaggerConfig {
        maximum_selection_size: 2,
        ..config()
    };
    let session = session(config, host.clone());
    session.initialize().await.unwrap();
    session.load_tree(REGION).await.unwrap();

    for path in ["Europe/Norway", "Europe/Denmark", "Europe/Sweden"] {
        let node = session.find_node(REGION, path).unwrap();
        session.toggle_node(REGION, node).unwrap();
    }

    let info = session.dimension(REGION).unwrap();
    assert_eq!(info.selected_ids(), vec!["dk", "se"]);
    assert_eq!(info.selected_paths(), vec!["Europe/Denmark", "Europe/Sweden"]);
}

#[tokio::test]
async fn test_capped_dimension_most_recent_policy() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let config = TaggerConfig {
        maximum_selection_size: 2,
        eviction: EvictionPolicy::MostRecent,
        ..config()
    };
    let session = session(config, host);
    session.initialize().await.unwrap();
    session.load_tree(REGION).await.unwrap();

    for path in ["Europe/Norway", "Europe/Denmark", "Europe/Sweden"] {
        let node = session.find_node(REGION, path).unwrap();
        session.toggle_node(REGION, node).unwrap();
    }

    assert_eq!(session.dimension(REGION).unwrap().selected_ids(), vec!["no", "se"]);
}

#[tokio::test]
async fn test_toggle_twice_deselects_and_dismisses_ui() {
    let catalog = Arc::new(CatalogProviders::new(fixture_catalog()));
    let host = Arc::new(fixture_document(Metadata::default()));
    let ui = Arc::new(RecordingUi::default());
    let providers = Providers::builder(catalog, host).ui(ui.clone()).build();
    let session = session_with_providers(config(), providers);
    session.initialize().await.unwrap();
    session.load_tree(REGION).await.unwrap();

    let node = session.find_node(REGION, "Europe/Sweden").unwrap();
    assert_eq!(session.toggle_node(REGION, node).unwrap(), ToggleOutcome::Selected);
    assert_eq!(session.toggle_node(REGION, node).unwrap(), ToggleOutcome::Deselected);
    assert!(session.model(REGION).unwrap().is_empty());
    assert_eq!(ui.dismissals(), 2);
}

#[tokio::test]
async fn test_leaf_only_rejects_inner_nodes() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let config = TaggerConfig {
        leaf_only: true,
        ..config()
    };
    let session = session(config, host);
    session.initialize().await.unwrap();
    session.load_tree(REGION).await.unwrap();

    let europe = session.find_node(REGION, "Europe").unwrap();
    assert_eq!(session.toggle_node(REGION, europe).unwrap(), ToggleOutcome::Rejected);
    let norway = session.find_node(REGION, "Europe/Norway").unwrap();
    assert_eq!(session.toggle_node(REGION, norway).unwrap(), ToggleOutcome::Selected);
}

#[tokio::test]
async fn test_model_editing_operations() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();

    session
        .update_model(REGION, vec![region_path("Asia"), region_path("Europe"), region_path("Europe/Norway")])
        .unwrap();
    assert!(session.move_entity(REGION, 2, 0).unwrap());
    assert_eq!(
        session.dimension(REGION).unwrap().selected_paths(),
        vec!["Europe/Norway", "Asia", "Europe"]
    );
    assert_eq!(
        session.remove_entity(REGION, "Asia").unwrap().map(|entity| entity.name),
        Some("Asia".to_string())
    );
    session.flush();
    assert_eq!(host.metadata().dimension(REGION).unwrap().entities.len(), 2);

    assert!(session.clear(REGION).unwrap());
    session.flush();
    assert!(host.metadata().dimension(REGION).unwrap().entities.is_empty());
}

#[tokio::test]
async fn test_read_only_session_rejects_mutations() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let config = TaggerConfig {
        editable: false,
        ..config()
    };
    let session = session(config, host);
    session.initialize().await.unwrap();

    assert_matches!(session.add_entity(REGION, region_path("Asia")), Err(TaggerError::ReadOnly));
    assert_matches!(session.clear(REGION), Err(TaggerError::ReadOnly));
}

#[tokio::test]
async fn test_unknown_dimension() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host);
    session.initialize().await.unwrap();

    assert_matches!(
        session.add_entity("dimension.Nope", region_path("Asia")),
        Err(TaggerError::UnknownDimension(id)) if id == "dimension.Nope"
    );
    assert_matches!(session.load_tree("dimension.Nope").await, Err(TaggerError::UnknownDimension(_)));
}

#[tokio::test]
async fn test_destroy_drops_pending_writes() {
    let host = Arc::new(fixture_document(Metadata::default()));
    let session = session(config(), host.clone());
    session.initialize().await.unwrap();

    session.add_entity(REGION, region_path("Asia")).unwrap();
    assert!(session.destroy());
    settle().await;

    assert_eq!(host.write_count(), 0);
    assert_matches!(session.add_entity(REGION, region_path("Europe")), Err(TaggerError::Destroyed));

    host.edit_as("another-editor", |metadata| metadata.dimensions.clear());
    settle().await;
    assert_eq!(session.stats().inbound_rereads, 0);
    assert_eq!(session.stats().state, "destroyed");
}
