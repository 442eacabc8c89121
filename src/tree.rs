//! Entity tree cache
//!
//! One lazily loaded browsable tree per dimension. Nodes live in an arena and
//! keep a parent link, so a node's ancestor chain is available when it is
//! cloned into a selection path.
//!
//! The cache itself is synchronous. [`load_root`] and [`expand`] drive the
//! provider round trips: they take the lock, decide, release it across the
//! await, and re-check the session ticket plus the tree epoch before applying
//! a completion.

use crate::entity_path::{self, PATH_SEPARATOR};
use crate::error::{TaggerError, TaggerResult};
use crate::lifecycle::Lifecycle;
use crate::model::Entity;
use crate::providers::TaxonomyStructureProvider;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FetchState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone)]
struct TreeNode {
    id: String,
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    children_omitted: Option<bool>,
    open: bool,
    loading: bool,
    error: bool,
}

impl TreeNode {
    fn is_expandable(&self) -> bool {
        !self.children.is_empty() || self.children_omitted == Some(true)
    }
}

/// Read-only snapshot of one tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub node: NodeId,
    pub id: String,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub children_omitted: Option<bool>,
    pub open: bool,
    pub loading: bool,
    pub error: bool,
    pub expandable: bool,
}

/// What a call to [`expand`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    Opened,
    Closed,
    /// Children were fetched and the node is open.
    Loaded { children: usize },
    /// A fetch for this node is already running.
    InFlight,
    /// The completion arrived for a superseded tree or session.
    Discarded,
}

enum ExpandStep {
    Toggled(ExpandOutcome),
    Fetch { entity_id: String, epoch: u64 },
}

#[derive(Debug, Default)]
pub struct EntityTreeCache {
    dimension_id: String,
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    state: FetchState,
    /// Bumped whenever the arena is rebuilt; node ids of older epochs are void.
    epoch: u64,
}

impl EntityTreeCache {
    pub fn new(dimension_id: impl Into<String>) -> Self {
        Self {
            dimension_id: dimension_id.into(),
            ..Default::default()
        }
    }

    pub fn dimension_id(&self) -> &str {
        &self.dimension_id
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Set when the root load failed.
    pub fn has_error(&self) -> bool {
        self.state == FetchState::Failed
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn node(&self, node: NodeId) -> Option<NodeView> {
        let entry = self.nodes.get(node)?;
        Some(NodeView {
            node,
            id: entry.id.clone(),
            name: entry.name.clone(),
            parent: entry.parent,
            children: entry.children.clone(),
            children_omitted: entry.children_omitted,
            open: entry.open,
            loading: entry.loading,
            error: entry.error,
            expandable: entry.is_expandable(),
        })
    }

    pub fn is_expandable(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(TreeNode::is_expandable)
    }

    pub fn collapse(&mut self, node: NodeId) -> TaggerResult<()> {
        let entry = self.entry_mut(node)?;
        entry.open = false;
        Ok(())
    }

    /// Root-to-node single chain for the node, markers stripped.
    pub fn path_entity(&self, node: NodeId) -> TaggerResult<Entity> {
        let mut current = self.entry(node)?;
        let mut chain = Entity::new(current.id.clone(), current.name.clone());
        while let Some(parent) = current.parent {
            current = self.entry(parent)?;
            chain = Entity::new(current.id.clone(), current.name.clone()).with_children(vec![chain]);
        }
        Ok(chain)
    }

    /// Node reached by successive name matches from the roots.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        self.find_segments(&self.roots, &segments)
    }

    fn find_segments(&self, candidates: &[NodeId], segments: &[&str]) -> Option<NodeId> {
        let (head, rest) = segments.split_first()?;
        candidates
            .iter()
            .copied()
            .filter(|&candidate| self.nodes[candidate].name == *head)
            .find_map(|candidate| {
                if rest.is_empty() {
                    Some(candidate)
                } else {
                    self.find_segments(&self.nodes[candidate].children, rest)
                }
            })
    }

    /// Rebuild the tree as nested entities, fetch markers included.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.roots.iter().map(|&root| self.to_entity(root)).collect()
    }

    fn to_entity(&self, node: NodeId) -> Entity {
        let entry = &self.nodes[node];
        Entity {
            id: entry.id.clone(),
            name: entry.name.clone(),
            entities: entry.children.iter().map(|&child| self.to_entity(child)).collect(),
            attributes: Vec::new(),
            children_omitted: entry.children_omitted,
        }
    }

    fn entry(&self, node: NodeId) -> TaggerResult<&TreeNode> {
        self.nodes.get(node).ok_or_else(|| TaggerError::UnknownNode {
            dimension_id: self.dimension_id.clone(),
            node,
        })
    }

    fn entry_mut(&mut self, node: NodeId) -> TaggerResult<&mut TreeNode> {
        let dimension_id = &self.dimension_id;
        self.nodes.get_mut(node).ok_or_else(|| TaggerError::UnknownNode {
            dimension_id: dimension_id.clone(),
            node,
        })
    }

    fn insert(&mut self, entity: &Entity, parent: Option<NodeId>) -> NodeId {
        let node = self.nodes.len();
        self.nodes.push(TreeNode {
            id: entity.id.clone(),
            name: entity.name.clone(),
            parent,
            children: Vec::new(),
            children_omitted: entity.children_omitted,
            open: false,
            loading: false,
            error: false,
        });
        let children: Vec<NodeId> = entity
            .entities
            .iter()
            .map(|child| self.insert(child, Some(node)))
            .collect();
        self.nodes[node].children = children;
        node
    }

    fn begin_root_load(&mut self) -> u64 {
        self.epoch += 1;
        self.state = FetchState::Loading;
        self.epoch
    }

    /// Replace the whole arena with `entities`.
    pub fn replace_roots(&mut self, entities: &[Entity]) {
        self.nodes.clear();
        self.roots = entities.iter().map(|entity| self.insert(entity, None)).collect();
        self.state = FetchState::Loaded;
    }

    fn begin_expand(&mut self, node: NodeId) -> TaggerResult<ExpandStep> {
        let epoch = self.epoch;
        let entry = self.entry_mut(node)?;
        if entry.loading {
            return Ok(ExpandStep::Toggled(ExpandOutcome::InFlight));
        }
        entry.open = !entry.open;
        if !entry.open {
            return Ok(ExpandStep::Toggled(ExpandOutcome::Closed));
        }
        if entry.children_omitted != Some(true) {
            return Ok(ExpandStep::Toggled(ExpandOutcome::Opened));
        }
        entry.loading = true;
        entry.error = false;
        Ok(ExpandStep::Fetch {
            entity_id: entry.id.clone(),
            epoch,
        })
    }

    fn complete_expand(&mut self, node: NodeId, children: &[Entity]) -> usize {
        let ids: Vec<NodeId> = children
            .iter()
            .map(|child| self.insert(child, Some(node)))
            .collect();
        let count = ids.len();
        let entry = &mut self.nodes[node];
        entry.children = ids;
        entry.children_omitted = Some(false);
        entry.loading = false;
        count
    }

    fn fail_expand(&mut self, node: NodeId) {
        let entry = &mut self.nodes[node];
        entry.loading = false;
        entry.error = true;
        entry.open = false;
    }
}

/// Fetch the dimension's top levels into the cache.
///
/// A failure marks the tree as failed and is returned; a superseded
/// completion leaves the cache untouched.
pub async fn load_root(
    tree: &Mutex<EntityTreeCache>,
    structure: &dyn TaxonomyStructureProvider,
    lifecycle: &Lifecycle,
    preload_depth: u32,
) -> TaggerResult<bool> {
    let ticket = lifecycle.ticket();
    let (dimension_id, epoch) = {
        let mut cache = tree.lock();
        (cache.dimension_id.clone(), cache.begin_root_load())
    };

    let response = structure.get_structure(&dimension_id, preload_depth).await;

    let mut cache = tree.lock();
    if !lifecycle.is_current(ticket) || cache.epoch != epoch {
        debug!(dimension_id = %dimension_id, "discarding stale tree load");
        return Ok(false);
    }
    match response {
        Ok(structure) => {
            cache.replace_roots(&structure.entities);
            debug!(dimension_id = %dimension_id, nodes = cache.len(), "tree loaded");
            Ok(true)
        }
        Err(source) => {
            cache.state = FetchState::Failed;
            warn!(dimension_id = %dimension_id, error = %source, "failed to load tree");
            Err(TaggerError::provider("get_structure", dimension_id, source))
        }
    }
}

/// Toggle a node open or closed, fetching its children when they were
/// omitted.
///
/// On fetch failure the node is collapsed with its error flag set and may be
/// expanded again later.
pub async fn expand(
    tree: &Mutex<EntityTreeCache>,
    structure: &dyn TaxonomyStructureProvider,
    lifecycle: &Lifecycle,
    node: NodeId,
) -> TaggerResult<ExpandOutcome> {
    let ticket = lifecycle.ticket();
    let (dimension_id, step) = {
        let mut cache = tree.lock();
        let step = cache.begin_expand(node)?;
        (cache.dimension_id.clone(), step)
    };
    let (entity_id, epoch) = match step {
        ExpandStep::Toggled(outcome) => return Ok(outcome),
        ExpandStep::Fetch { entity_id, epoch } => (entity_id, epoch),
    };

    let response = structure.get_structure(&entity_id, 1).await;

    let mut cache = tree.lock();
    if !lifecycle.is_current(ticket) || cache.epoch != epoch {
        if cache.epoch == epoch {
            // children were never fetched, so the node cannot stay open
            let entry = &mut cache.nodes[node];
            entry.loading = false;
            entry.open = false;
        }
        debug!(dimension_id = %dimension_id, entity_id = %entity_id, "discarding stale expand");
        return Ok(ExpandOutcome::Discarded);
    }
    match response {
        Ok(structure) => {
            let children = cache.complete_expand(node, &structure.entities);
            Ok(ExpandOutcome::Loaded { children })
        }
        Err(source) => {
            cache.fail_expand(node);
            warn!(
                dimension_id = %dimension_id,
                entity_id = %entity_id,
                error = %source,
                "failed to expand tree node"
            );
            Err(TaggerError::provider("expand", entity_id, source))
        }
    }
}

/// Path of a node's chain, for logs and lookups.
pub fn node_path(cache: &EntityTreeCache, node: NodeId) -> TaggerResult<String> {
    cache.path_entity(node).map(|entity| entity_path::to_path(&entity))
}
