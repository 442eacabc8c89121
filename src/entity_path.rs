//! Entity path codec
//!
//! Converts between single-chain selection entities and `/`-joined path
//! strings, searches browsable trees by path, and strips the transient
//! `children-omitted` marker before entities leave the core.

use crate::model::Entity;

pub const PATH_SEPARATOR: char = '/';

/// Build a single-chain entity from a `/`-joined path.
pub fn from_path(path: &str) -> Entity {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    from_segments(&segments)
}

/// Build a single-chain entity where `id == name == segment` at every depth.
///
/// An empty segment list yields an entity with empty id and name, mirroring
/// how an empty path splits into a single empty segment.
pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Entity {
    match segments.split_first() {
        Some((head, rest)) => {
            let head = head.as_ref();
            let mut entity = Entity::new(head, head);
            if !rest.is_empty() {
                entity.entities = vec![from_segments(rest)];
            }
            entity
        }
        None => Entity::default(),
    }
}

/// Names along the `entities[0]` chain.
pub fn to_segments(entity: &Entity) -> Vec<&str> {
    let mut segments = vec![entity.name.as_str()];
    let mut current = entity;
    while let Some(child) = current.entities.first() {
        segments.push(child.name.as_str());
        current = child;
    }
    segments
}

pub fn to_path(entity: &Entity) -> String {
    to_segments(entity).join("/")
}

/// Two selection entities are the same selection when their paths match.
pub fn same_path(a: &Entity, b: &Entity) -> bool {
    let (mut left, mut right) = (a, b);
    loop {
        if left.name != right.name {
            return false;
        }
        match (left.entities.first(), right.entities.first()) {
            (Some(l), Some(r)) => {
                left = l;
                right = r;
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Depth-first search for the node reached by successive name matches.
///
/// Segments are consumed per level on a sub-slice, so the caller's list is
/// left intact. Returns `None` for an empty segment list.
pub fn find_by_path<'a, S: AsRef<str>>(nodes: &'a [Entity], segments: &[S]) -> Option<&'a Entity> {
    let (head, rest) = segments.split_first()?;
    let head = head.as_ref();

    nodes
        .iter()
        .filter(|node| node.name == head)
        .find_map(|node| {
            if rest.is_empty() {
                Some(node)
            } else {
                find_by_path(&node.entities, rest)
            }
        })
}

/// Id of the node at the end of the `entities[0]` chain.
pub fn leaf_id(entity: &Entity) -> &str {
    let mut current = entity;
    while let Some(child) = current.entities.first() {
        current = child;
    }
    &current.id
}

/// Remove the `children-omitted` marker from the entity and all descendants.
pub fn clean(entity: &mut Entity) {
    entity.children_omitted = None;
    entity.entities.iter_mut().for_each(clean);
}

pub fn cleaned(mut entity: Entity) -> Entity {
    clean(&mut entity);
    entity
}
