//! Catalog provider - serves every capability from a taxonomy catalog file

use crate::entity_path::{self, PATH_SEPARATOR};
use crate::model::{AnnotationHit, Dimension, Entity, EntityTree};
use crate::providers::{
    AnnotationProvider, ContentBackedResolver, EntitySuggestionProvider, LookupCandidateProvider,
    TaxonomyStructureProvider,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const MAX_SUGGESTIONS: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub taxonomies: Vec<CatalogTaxonomy>,
    /// Lookup candidates by dimension id.
    #[serde(default)]
    pub lookups: HashMap<String, Vec<Entity>>,
    /// Content-backed entities (with attributes) by dimension id.
    #[serde(default)]
    pub content_backed: HashMap<String, Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogTaxonomy {
    pub id: String,
    /// External id alias. Taxonomies without one are unusable.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// Providers backed by an in-memory [`Catalog`].
#[derive(Debug, Clone)]
pub struct CatalogProviders {
    catalog: Catalog,
}

impl CatalogProviders {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {:?}", path))?;
        let catalog: Catalog = crate::config::parse_by_extension(path, &contents)?;
        tracing::info!(
            path = %path.display(),
            taxonomies = catalog.taxonomies.len(),
            "catalog loaded"
        );
        Ok(Self::new(catalog))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn taxonomy_by_alias(&self, alias: &str) -> Option<&CatalogTaxonomy> {
        self.catalog
            .taxonomies
            .iter()
            .find(|taxonomy| taxonomy.alias.as_deref() == Some(alias))
    }

    fn taxonomy_by_id(&self, taxonomy_id: &str) -> Option<&CatalogTaxonomy> {
        self.catalog
            .taxonomies
            .iter()
            .find(|taxonomy| taxonomy.id == taxonomy_id)
    }

    fn dimension(&self, dimension_id: &str) -> Option<&Dimension> {
        self.catalog
            .taxonomies
            .iter()
            .flat_map(|taxonomy| taxonomy.dimensions.iter())
            .find(|dimension| dimension.id == dimension_id)
    }

    fn find_node(&self, node_id: &str) -> Option<&Entity> {
        fn walk<'a>(nodes: &'a [Entity], node_id: &str) -> Option<&'a Entity> {
            nodes.iter().find_map(|node| {
                if node.id == node_id {
                    Some(node)
                } else {
                    walk(&node.entities, node_id)
                }
            })
        }

        self.catalog
            .taxonomies
            .iter()
            .flat_map(|taxonomy| taxonomy.dimensions.iter())
            .find_map(|dimension| walk(&dimension.entities, node_id))
    }
}

/// Copy `nodes` keeping `depth` levels; cut nodes are marked as having
/// omitted children.
fn truncate(nodes: &[Entity], depth: u32) -> Vec<Entity> {
    if depth == 0 {
        return Vec::new();
    }
    nodes
        .iter()
        .map(|node| {
            let mut copy = node.clone();
            if node.entities.is_empty() {
                copy.children_omitted = None;
            } else if depth == 1 {
                copy.entities = Vec::new();
                copy.children_omitted = Some(true);
            } else {
                copy.entities = truncate(&node.entities, depth - 1);
                copy.children_omitted = Some(false);
            }
            copy
        })
        .collect()
}

/// Every node of the tree as a root-to-node path entity.
fn path_entities(nodes: &[Entity]) -> Vec<(Entity, &Entity)> {
    fn walk<'a>(nodes: &'a [Entity], ancestors: &mut Vec<&'a Entity>, out: &mut Vec<(Entity, &'a Entity)>) {
        for node in nodes {
            let mut chain = Entity {
                entities: Vec::new(),
                children_omitted: None,
                ..node.clone()
            };
            for ancestor in ancestors.iter().rev() {
                chain = Entity {
                    entities: vec![chain],
                    children_omitted: None,
                    ..(*ancestor).clone()
                };
            }
            out.push((chain, node));
            ancestors.push(node);
            walk(&node.entities, ancestors, out);
            ancestors.pop();
        }
    }

    let mut out = Vec::new();
    walk(nodes, &mut Vec::new(), &mut out);
    out
}

#[async_trait]
impl TaxonomyStructureProvider for CatalogProviders {
    async fn external_alias(&self, taxonomy_id: &str) -> Result<Option<String>> {
        self.taxonomy_by_id(taxonomy_id)
            .map(|taxonomy| taxonomy.alias.clone())
            .ok_or_else(|| anyhow!("unknown taxonomy '{}'", taxonomy_id))
    }

    async fn get_structure(&self, root_id: &str, depth: u32) -> Result<EntityTree> {
        if let Some(taxonomy) = self.taxonomy_by_alias(root_id) {
            let dimensions = taxonomy
                .dimensions
                .iter()
                .map(|dimension| Dimension {
                    entities: truncate(&dimension.entities, depth),
                    ..dimension.clone()
                })
                .collect();
            return Ok(EntityTree {
                id: taxonomy.id.clone(),
                name: taxonomy.id.clone(),
                entities: Vec::new(),
                dimensions,
            });
        }

        if let Some(dimension) = self.dimension(root_id) {
            return Ok(EntityTree {
                id: dimension.id.clone(),
                name: dimension.name.clone(),
                entities: truncate(&dimension.entities, depth),
                dimensions: Vec::new(),
            });
        }

        let node = self
            .find_node(root_id)
            .ok_or_else(|| anyhow!("no structure for '{}'", root_id))?;
        Ok(EntityTree {
            id: node.id.clone(),
            name: node.name.clone(),
            entities: truncate(&node.entities, depth),
            dimensions: Vec::new(),
        })
    }
}

#[async_trait]
impl EntitySuggestionProvider for CatalogProviders {
    async fn suggestions(&self, dimension_id: &str, query: &str) -> Result<Vec<Entity>> {
        let dimension = self
            .dimension(dimension_id)
            .ok_or_else(|| anyhow!("unknown dimension '{}'", dimension_id))?;

        let tokens: Vec<String> = query
            .split(|c: char| c.is_whitespace() || c == PATH_SEPARATOR)
            .map(|token| token.trim().to_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        let matches = path_entities(&dimension.entities)
            .into_iter()
            .filter(|(chain, _)| {
                let path = entity_path::to_path(chain).to_lowercase();
                tokens.iter().all(|token| path.contains(token.as_str()))
            })
            .map(|(chain, _)| chain)
            .take(MAX_SUGGESTIONS)
            .collect();
        Ok(matches)
    }
}

#[async_trait]
impl ContentBackedResolver for CatalogProviders {
    async fn resolve(&self, dimension_id: &str, path: &str) -> Result<Vec<Entity>> {
        Ok(self
            .catalog
            .content_backed
            .get(dimension_id)
            .map(|entities| {
                entities
                    .iter()
                    .filter(|entity| entity_path::to_path(entity) == path)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl AnnotationProvider for CatalogProviders {
    /// Suggests every tree node whose name occurs as a whole word in the text.
    async fn annotate(&self, taxonomy_id: &str, text: &str) -> Result<Vec<AnnotationHit>> {
        let taxonomy = self
            .taxonomy_by_id(taxonomy_id)
            .ok_or_else(|| anyhow!("unknown taxonomy '{}'", taxonomy_id))?;

        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect();

        let hits = taxonomy
            .dimensions
            .iter()
            .filter_map(|dimension| {
                let entities: Vec<Entity> = path_entities(&dimension.entities)
                    .into_iter()
                    .filter(|(_, node)| {
                        let name_words: Vec<String> = node
                            .name
                            .split_whitespace()
                            .map(str::to_lowercase)
                            .collect();
                        !name_words.is_empty()
                            && words
                                .windows(name_words.len())
                                .any(|window| window == name_words.as_slice())
                    })
                    .map(|(chain, _)| chain)
                    .collect();
                (!entities.is_empty()).then(|| AnnotationHit {
                    dimension_id: dimension.id.clone(),
                    entities,
                })
            })
            .collect();
        Ok(hits)
    }
}

#[async_trait]
impl LookupCandidateProvider for CatalogProviders {
    async fn candidates(&self, dimension_id: &str) -> Result<Vec<Entity>> {
        Ok(self
            .catalog
            .lookups
            .get(dimension_id)
            .cloned()
            .unwrap_or_default())
    }
}
