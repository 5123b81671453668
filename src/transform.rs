//! World/local translation recomputation around structural edits.
//!
//! Only translations are composed. Rotation and scale are carried through
//! untouched, so the two passes are exact inverses of each other.

use nalgebra::Vector3;

use crate::scene::SceneGraph;

/// Top-down: `world(node) = world(parent) + translation(node)`.
pub fn update_world_positions(graph: &mut SceneGraph) {
    for id in graph.traverse() {
        let parent_world = match graph.node(id).parent {
            Some(parent) => graph.node(parent).world_position,
            None => Vector3::zeros(),
        };
        let node = graph.node_mut(id);
        node.world_position = parent_world + node.translation;
    }
}

/// Top-down inverse: `translation(node) = world(node) - world(parent)`.
pub fn local_from_world(graph: &mut SceneGraph) {
    for id in graph.traverse() {
        let parent_world = match graph.node(id).parent {
            Some(parent) => graph.node(parent).world_position,
            None => Vector3::zeros(),
        };
        let node = graph.node_mut(id);
        node.translation = node.world_position - parent_world;
    }
}
