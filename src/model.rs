use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One taxonomy node. As a selection it encodes a single root-to-leaf chain
/// through `entities[0]`; as a browsable tree node it may hold many children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Only present on content-backed entities.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// UI-only fetch marker: `Some(true)` means unfetched children exist.
    /// Never written to the host document.
    #[serde(
        rename = "children-omitted",
        alias = "childrenOmitted",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub children_omitted: Option<bool>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_children(mut self, children: Vec<Entity>) -> Self {
        self.entities = children;
        self
    }

    pub fn with_children_omitted(mut self, omitted: bool) -> Self {
        self.children_omitted = Some(omitted);
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn is_content_backed(&self) -> bool {
        !self.attributes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn default_enumerable() -> bool {
    true
}

/// One taxonomy facet as persisted on the host document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub localizations: BTreeMap<String, String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Non-enumerable dimensions accept free-text entries.
    #[serde(default = "default_enumerable")]
    pub enumerable: bool,
}

impl Dimension {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            localizations: BTreeMap::new(),
            entities: Vec::new(),
            enumerable: true,
        }
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = entities;
        self
    }
}

/// The host document's metadata payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Metadata {
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl Metadata {
    pub fn dimension(&self, dimension_id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id == dimension_id)
    }

    pub fn position(&self, dimension_id: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.id == dimension_id)
    }
}

/// Response of a structure fetch. `dimensions` is populated when the root is
/// a taxonomy, `entities` when the root is a dimension or a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntityTree {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// One annotation hit: entities suggested for a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationHit {
    pub dimension_id: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_omitted_wire_name() {
        let entity = Entity::new("a", "A").with_children_omitted(true);
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["children-omitted"], serde_json::Value::Bool(true));

        let plain = serde_json::to_value(Entity::new("a", "A")).unwrap();
        assert!(plain.get("children-omitted").is_none());
    }

    #[test]
    fn test_dimension_defaults_enumerable() {
        let dimension: Dimension =
            serde_json::from_str(r#"{"id":"dimension.Tag","name":"Tag"}"#).unwrap();
        assert!(dimension.enumerable);
        assert!(dimension.entities.is_empty());
    }

    #[test]
    fn test_hit_camel_case() {
        let hit: AnnotationHit = serde_json::from_str(
            r#"{"dimensionId":"dimension.Tag","entities":[{"id":"x","name":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(hit.dimension_id, "dimension.Tag");
        assert_eq!(hit.entities.len(), 1);
    }
}
