// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of entity-association records into a tree.
//!
//! Devices export a flat pile of association records (one container entity,
//! one or more contained entities). The tree is grown from the record whose
//! container id matches the device's container, then the remaining records
//! are attached wherever their container entity already appears. An entity
//! may appear in the tree at most once; an association that would introduce
//! a duplicate (including a back-edge to an ancestor) is discarded.

use pldm_messages::pdr::Entity;
use pldm_messages::pdr::EntityAssociationPdr;
use slog::warn;
use slog::Logger;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct TreeNode {
    entity: Entity,
    children: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct EntityTree {
    nodes: Vec<TreeNode>,
}

impl EntityTree {
    fn new(root: Entity) -> Self {
        Self { nodes: vec![TreeNode { entity: root, children: Vec::new() }] }
    }

    pub fn root(&self) -> Entity {
        self.nodes[0].entity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.find(entity).is_some()
    }

    /// Breadth-first search for the (unique) node holding `entity`.
    fn find(&self, entity: Entity) -> Option<usize> {
        let mut queue = VecDeque::from([0usize]);
        while let Some(index) = queue.pop_front() {
            if self.nodes[index].entity == entity {
                return Some(index);
            }
            queue.extend(self.nodes[index].children.iter().copied());
        }
        None
    }

    /// Attach `children` under `parent`, discarding any entity already in
    /// the tree. Returns how many were discarded.
    fn add_children(
        &mut self,
        parent: usize,
        children: impl IntoIterator<Item = Entity>,
    ) -> usize {
        let mut discarded = 0;
        for child in children {
            if self.contains(child) {
                discarded += 1;
                continue;
            }
            let index = self.nodes.len();
            self.nodes.push(TreeNode { entity: child, children: Vec::new() });
            self.nodes[parent].children.push(index);
        }
        discarded
    }

    /// Every entity reachable from the root, paired with its ancestor
    /// chain (root first, the entity itself last), in depth-first order.
    pub fn paths(&self) -> Vec<Vec<Entity>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(0, &mut Vec::new(), &mut out);
        out
    }

    fn walk(
        &self,
        index: usize,
        chain: &mut Vec<Entity>,
        out: &mut Vec<Vec<Entity>>,
    ) {
        chain.push(self.nodes[index].entity);
        out.push(chain.clone());
        for &child in &self.nodes[index].children {
            self.walk(child, chain, out);
        }
        chain.pop();
    }
}

/// Build the tree from parsed association records.
///
/// Records sharing a container entity are merged first. The root is grown
/// from every record whose container id equals `device_container_id`;
/// remaining records are repeatedly attached to their matching node until a
/// pass makes no progress, at which point the orphans are dropped.
pub fn build(
    mut associations: Vec<EntityAssociationPdr>,
    device_container_id: u16,
    log: &Logger,
) -> Option<EntityTree> {
    merge_duplicate_containers(&mut associations);

    let root_entity = associations
        .iter()
        .find(|assoc| assoc.container.container_id == device_container_id)
        .map(|assoc| assoc.container)?;
    let mut tree = EntityTree::new(root_entity);

    let mut discarded = 0;
    associations.retain(|assoc| {
        if assoc.container.container_id != device_container_id {
            return true;
        }
        discarded += tree.add_children(0, assoc.contained.iter().copied());
        false
    });

    loop {
        let before = associations.len();
        associations.retain(|assoc| match tree.find(assoc.container) {
            Some(parent) => {
                discarded +=
                    tree.add_children(parent, assoc.contained.iter().copied());
                false
            }
            None => true,
        });
        if associations.is_empty() {
            break;
        }
        if associations.len() == before {
            warn!(
                log, "dropping orphan entity associations";
                "count" => associations.len(),
            );
            break;
        }
    }

    if discarded > 0 {
        warn!(
            log, "discarded duplicate or cyclic entity associations";
            "count" => discarded,
        );
    }
    Some(tree)
}

// A device may split one container's children across several records; fold
// them into one before tree construction.
fn merge_duplicate_containers(associations: &mut Vec<EntityAssociationPdr>) {
    let mut merged: Vec<EntityAssociationPdr> = Vec::new();
    for assoc in associations.drain(..) {
        match merged.iter_mut().find(|m| m.container == assoc.container) {
            Some(existing) => {
                existing.contained.extend(assoc.contained);
            }
            None => merged.push(assoc),
        }
    }
    *associations = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(entity_type: u16, instance: u16, container_id: u16) -> Entity {
        Entity { entity_type, instance, container_id }
    }

    fn assoc(container: Entity, contained: &[Entity]) -> EntityAssociationPdr {
        EntityAssociationPdr {
            container_id: container.container_id,
            association_type: 0,
            container,
            contained: contained.to_vec(),
        }
    }

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn builds_two_level_tree() {
        let root = entity(45, 1, 1);
        let board = entity(64, 1, 2);
        let cpu = entity(135, 1, 3);
        let tree = build(
            vec![assoc(root, &[board]), assoc(board, &[cpu])],
            1,
            &test_log(),
        )
        .unwrap();

        assert_eq!(tree.root(), root);
        assert_eq!(tree.len(), 3);
        let paths = tree.paths();
        assert!(paths.contains(&vec![root, board, cpu]));
    }

    #[test]
    fn back_edge_to_root_is_discarded() {
        let root = entity(45, 1, 1);
        let child = entity(64, 1, 2);
        let tree = build(
            vec![assoc(root, &[child]), assoc(child, &[root])],
            1,
            &test_log(),
        )
        .unwrap();

        // The cyclic edge is gone; only the acyclic projection remains.
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.paths(), vec![vec![root], vec![root, child]]);
    }

    #[test]
    fn duplicate_children_collapse_to_one() {
        let root = entity(45, 1, 1);
        let child = entity(64, 1, 2);
        let tree = build(
            vec![assoc(root, &[child, child]), assoc(root, &[child])],
            1,
            &test_log(),
        )
        .unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn orphans_are_dropped() {
        let root = entity(45, 1, 1);
        let child = entity(64, 1, 2);
        let orphan = assoc(entity(99, 9, 77), &[entity(98, 1, 78)]);
        let tree =
            build(vec![assoc(root, &[child]), orphan], 1, &test_log()).unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn no_root_means_no_tree() {
        let stray = assoc(entity(1, 1, 5), &[entity(2, 1, 6)]);
        assert!(build(vec![stray], 1, &test_log()).is_none());
    }
}
