//! Fixture catalog and session builders

use std::collections::HashMap;
use std::sync::Arc;
use taxonomy_tagger::entity_path;
use taxonomy_tagger::providers::{Catalog, CatalogTaxonomy};
use taxonomy_tagger::{
    Attribute, CatalogProviders, Dimension, Entity, MemoryHostDocument, Metadata, Providers,
    Reconciler, TaggerConfig,
};

pub const REGION: &str = "dimension.Region";
pub const TAG: &str = "dimension.Tag";
pub const CATEGORY: &str = "dimension.Category";

fn region_tree() -> Vec<Entity> {
    vec![
        Entity::new("europe", "Europe").with_children(vec![
            Entity::new("se", "Sweden").with_children(vec![Entity::new("sthlm", "Stockholm")]),
            Entity::new("no", "Norway"),
            Entity::new("dk", "Denmark"),
        ]),
        Entity::new("asia", "Asia").with_children(vec![Entity::new("jp", "Japan")]),
    ]
}

/// Places (Region, Tag), Topics (Category, Region again) and a taxonomy
/// without an alias.
pub fn fixture_catalog() -> Catalog {
    let mut tag = Dimension::new(TAG, "Tag");
    tag.enumerable = false;

    let mut lookups = HashMap::new();
    lookups.insert(REGION.to_string(), vec![Entity::new("global-1", "Global")]);

    let mut sweden = entity_path::from_path("Europe/Sweden");
    sweden.entities[0].attributes = vec![Attribute::new("capital", "Stockholm")];
    let mut content_backed = HashMap::new();
    content_backed.insert(REGION.to_string(), vec![sweden]);

    Catalog {
        taxonomies: vec![
            CatalogTaxonomy {
                id: "tax.places".into(),
                alias: Some("taxonomy.Places".into()),
                dimensions: vec![
                    Dimension::new(REGION, "Region").with_entities(region_tree()),
                    tag,
                ],
            },
            CatalogTaxonomy {
                id: "tax.topics".into(),
                alias: Some("taxonomy.Topics".into()),
                dimensions: vec![
                    Dimension::new(CATEGORY, "Category").with_entities(vec![
                        Entity::new("sports", "Sports")
                            .with_children(vec![Entity::new("football", "Football")]),
                        Entity::new("politics", "Politics"),
                    ]),
                    Dimension::new(REGION, "Region (topics)"),
                ],
            },
            CatalogTaxonomy {
                id: "tax.legacy".into(),
                alias: None,
                dimensions: vec![Dimension::new("dimension.Legacy", "Legacy")],
            },
        ],
        lookups,
        content_backed,
    }
}

/// Host document listing every fixture taxonomy, with empty metadata.
pub fn fixture_document(metadata: Metadata) -> MemoryHostDocument {
    MemoryHostDocument::new(
        metadata,
        vec!["tax.places".into(), "tax.topics".into(), "tax.legacy".into()],
    )
    .with_text("title", "Stockholm derby ends in a draw")
    .with_text("body", "Football fans travelled from Japan")
}

pub fn region_path(path: &str) -> Entity {
    entity_path::from_path(path)
}

/// Session over the fixture catalog with every capability enabled.
pub fn session(config: TaggerConfig, host: Arc<MemoryHostDocument>) -> Reconciler {
    let catalog = Arc::new(CatalogProviders::new(fixture_catalog()));
    Reconciler::new(config, Providers::from_catalog(catalog, host))
}

pub fn session_with_providers(config: TaggerConfig, providers: Providers) -> Reconciler {
    Reconciler::new(config, providers)
}
