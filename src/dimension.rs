//! Per-dimension runtime state and selection rules

use crate::config::{EvictionPolicy, TaggerConfig};
use crate::entity_path;
use crate::model::{Dimension, Entity};
use crate::tree::NodeView;
use indexmap::IndexMap;

/// Managed dimensions keyed by id, in host slot order.
pub type DimensionMap = IndexMap<String, DimensionInfo>;

/// Resolution caches for content-backed entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveInfo {
    /// Paths already answered by the resolver.
    pub resolved: Vec<String>,
    /// Entities the resolver confirmed as content-backed.
    pub known_content_backed: Vec<Entity>,
}

impl ResolveInfo {
    pub fn is_resolved(&self, path: &str) -> bool {
        self.resolved.iter().any(|resolved| resolved == path)
    }

    pub fn record(&mut self, path: &str, confirmed: Option<Entity>) {
        if !self.is_resolved(path) {
            self.resolved.push(path.to_string());
        }
        if let Some(entity) = confirmed {
            let known = self
                .known_content_backed
                .iter()
                .any(|existing| entity_path::same_path(existing, &entity));
            if !known {
                self.known_content_backed.push(entity);
            }
        }
    }
}

/// Selection rules taken from the session config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRules {
    pub leaf_only: bool,
    /// 0 means unbounded.
    pub maximum_selection_size: usize,
    pub eviction: EvictionPolicy,
}

impl From<&TaggerConfig> for SelectionRules {
    fn from(config: &TaggerConfig) -> Self {
        Self {
            leaf_only: config.leaf_only,
            maximum_selection_size: config.maximum_selection_size,
            eviction: config.eviction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Leaf-only mode refused an inner node.
    Rejected,
    Selected,
    /// A full dimension dropped `evicted` to make room.
    SelectedWithEviction { evicted: Entity },
    Deselected,
}

impl ToggleOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, ToggleOutcome::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionInfo {
    pub dimension: Dimension,
    /// Slot of this dimension in the host metadata.
    pub dimension_index: usize,
    /// Working copy of the dimension's selections.
    pub model: Vec<Entity>,
    pub lookups: Vec<Entity>,
    pub resolve_info: ResolveInfo,
}

impl DimensionInfo {
    pub fn new(dimension: Dimension, dimension_index: usize, model: Vec<Entity>) -> Self {
        Self {
            dimension,
            dimension_index,
            model,
            lookups: Vec::new(),
            resolve_info: ResolveInfo::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.dimension.id
    }

    pub fn selected_ids(&self) -> Vec<&str> {
        self.model.iter().map(entity_path::leaf_id).collect()
    }

    pub fn selected_paths(&self) -> Vec<String> {
        self.model.iter().map(entity_path::to_path).collect()
    }

    pub fn contains_path(&self, entity: &Entity) -> bool {
        self.model
            .iter()
            .any(|selected| entity_path::same_path(selected, entity))
    }

    /// Select or deselect a tree node.
    ///
    /// `path_entity` is the node's root-to-node chain.
    pub fn toggle(
        &mut self,
        node: &NodeView,
        path_entity: Entity,
        rules: SelectionRules,
    ) -> ToggleOutcome {
        if rules.leaf_only && node.expandable {
            return ToggleOutcome::Rejected;
        }

        if let Some(position) = self
            .model
            .iter()
            .position(|selected| entity_path::leaf_id(selected) == node.id)
        {
            self.model.remove(position);
            return ToggleOutcome::Deselected;
        }

        let evicted = if rules.maximum_selection_size > 0
            && self.model.len() >= rules.maximum_selection_size
        {
            match rules.eviction {
                EvictionPolicy::Oldest => Some(self.model.remove(0)),
                EvictionPolicy::MostRecent => self.model.pop(),
            }
        } else {
            None
        };

        self.model.push(entity_path::cleaned(path_entity));
        match evicted {
            Some(evicted) => ToggleOutcome::SelectedWithEviction { evicted },
            None => ToggleOutcome::Selected,
        }
    }

    /// Append an entity unless its path is already selected.
    pub fn add_entity(&mut self, entity: Entity) -> bool {
        if self.contains_path(&entity) {
            return false;
        }
        self.model.push(entity_path::cleaned(entity));
        true
    }

    pub fn remove_path(&mut self, path: &str) -> Option<Entity> {
        let position = self
            .model
            .iter()
            .position(|selected| entity_path::to_path(selected) == path)?;
        Some(self.model.remove(position))
    }

    /// Move the selection at `from` so that it ends up at `to`.
    pub fn move_entity(&mut self, from: usize, to: usize) -> bool {
        if from >= self.model.len() || to >= self.model.len() || from == to {
            return false;
        }
        let entity = self.model.remove(from);
        self.model.insert(to, entity);
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.model.is_empty() {
            return false;
        }
        self.model.clear();
        true
    }

    /// Replace the whole model. Returns whether anything changed.
    pub fn replace_model(&mut self, entities: Vec<Entity>) -> bool {
        let entities: Vec<Entity> = entities.into_iter().map(entity_path::cleaned).collect();
        if self.model == entities {
            return false;
        }
        self.model = entities;
        true
    }

    /// Install lookup candidates, normalized and deduplicated by name,
    /// skipping names already selected.
    pub fn set_lookups(&mut self, candidates: Vec<Entity>) {
        let mut lookups: Vec<Entity> = Vec::new();
        for candidate in candidates {
            let name = candidate.name;
            let taken = lookups.iter().any(|lookup| lookup.name == name)
                || self.model.iter().any(|selected| selected.name == name);
            if !taken {
                lookups.push(normalized_lookup(name));
            }
        }
        self.lookups = lookups;
    }

    /// Select the first lookup candidate when nothing is selected yet.
    pub fn auto_select_lookup(&mut self) -> bool {
        if !self.model.is_empty() {
            return false;
        }
        match self.lookups.first() {
            Some(first) => {
                self.model.push(entity_path::cleaned(first.clone()));
                true
            }
            None => false,
        }
    }

    /// Select a lookup item. Lookup dimensions stay single-valued: the older
    /// selection goes back to the candidates.
    pub fn select_lookup_item(&mut self, item: Entity) -> bool {
        if self.contains_path(&item) {
            return false;
        }
        self.lookups.retain(|lookup| lookup.name != item.name);
        self.model.push(entity_path::cleaned(item));
        if self.model.len() > 1 {
            let older = self.model.remove(0);
            self.return_lookup(older);
        }
        true
    }

    /// Remove a selected lookup item and offer it as a candidate again. An
    /// emptied dimension falls back to the first candidate.
    pub fn remove_lookup_item(&mut self, item: &Entity) -> bool {
        let Some(position) = self
            .model
            .iter()
            .position(|selected| entity_path::same_path(selected, item))
        else {
            return false;
        };
        let removed = self.model.remove(position);
        self.return_lookup(removed);
        self.auto_select_lookup();
        true
    }

    fn return_lookup(&mut self, item: Entity) {
        if !self.lookups.iter().any(|lookup| lookup.name == item.name) {
            self.lookups.push(normalized_lookup(item.name));
        }
        self.lookups.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Content-backed entity known for the selection's path, if any.
    pub fn content_backed(&self, entity: &Entity) -> Option<&Entity> {
        let segments = entity_path::to_segments(entity);
        entity_path::find_by_path(&self.resolve_info.known_content_backed, &segments)
    }

    /// Paths of model entries the resolver has not answered yet.
    pub fn unresolved_paths(&self) -> Vec<String> {
        self.model
            .iter()
            .map(entity_path::to_path)
            .filter(|path| !self.resolve_info.is_resolved(path))
            .collect()
    }
}

fn normalized_lookup(name: String) -> Entity {
    Entity {
        id: name.clone(),
        name,
        entities: Vec::new(),
        attributes: Vec::new(),
        children_omitted: Some(false),
    }
}
