//! Removal of bones that carry nothing, with joint index remapping.

use std::mem;

use serde::Serialize;

use crate::error::{LoadError, Result};
use crate::scene::{Mesh, NodeId, SceneGraph, Skin};
use crate::transform::{local_from_world, update_world_positions};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneSummary {
    /// Names of the removed nodes, in removal order.
    pub removed: Vec<String>,
    /// Leaf/splice rounds run before nothing changed.
    pub rounds: usize,
}

/// Delete every removable node, then compact the arena and rewrite all
/// node handles and mesh joint indices.
///
/// World placement of the survivors is preserved: spliced children are
/// re-expressed relative to their new parent.
pub fn prune(graph: &mut SceneGraph) -> Result<PruneSummary> {
    update_world_positions(graph);

    let mut removed = vec![false; graph.nodes.len()];
    let mut summary = PruneSummary::default();
    loop {
        let before = summary.removed.len();
        remove_leaves(graph, &mut removed, &mut summary.removed);
        splice_interior(graph, &mut removed, &mut summary.removed);
        summary.rounds += 1;
        if summary.removed.len() == before {
            break;
        }
    }

    if !summary.removed.is_empty() {
        compact(graph, &removed)?;
    }
    local_from_world(graph);
    graph
        .verify_forest()
        .map_err(|err| LoadError::InvariantViolation(format!("forest broken after prune: {err}")))?;

    log::info!(
        "pruned {} nodes in {} rounds, {} remain",
        summary.removed.len(),
        summary.rounds,
        graph.nodes.len()
    );
    Ok(summary)
}

// ─── Removal passes ───────────────────────────────────────────────────────────

fn remove_leaves(graph: &mut SceneGraph, removed: &mut [bool], names: &mut Vec<String>) {
    loop {
        let mut any = false;
        for index in 0..graph.nodes.len() {
            let node = &graph.nodes[index];
            if removed[index] || !node.is_removable() || !node.children.is_empty() {
                continue;
            }
            graph.detach(NodeId(index));
            removed[index] = true;
            names.push(graph.nodes[index].name.clone());
            any = true;
        }
        if !any {
            break;
        }
    }
}

fn splice_interior(graph: &mut SceneGraph, removed: &mut [bool], names: &mut Vec<String>) {
    for index in 0..graph.nodes.len() {
        if removed[index] || !graph.nodes[index].is_removable() {
            continue;
        }
        splice(graph, NodeId(index));
        removed[index] = true;
        names.push(graph.nodes[index].name.clone());
    }
}

/// Replace `id` with its children at its position among its siblings.
fn splice(graph: &mut SceneGraph, id: NodeId) {
    let children = mem::take(&mut graph.node_mut(id).children);
    let parent = graph.node_mut(id).parent.take();
    for &child in &children {
        graph.node_mut(child).parent = parent;
    }
    let siblings = match parent {
        Some(parent) => &mut graph.node_mut(parent).children,
        None => &mut graph.roots,
    };
    if let Some(position) = siblings.iter().position(|&sibling| sibling == id) {
        siblings.splice(position..=position, children);
    }
    log::debug!("spliced out {:?}", graph.node(id).name);
}

// ─── Compaction ───────────────────────────────────────────────────────────────

fn compact(graph: &mut SceneGraph, removed: &[bool]) -> Result<()> {
    let mut old_to_new = vec![None; graph.nodes.len()];
    let mut next = 0;
    for (old, gone) in removed.iter().enumerate() {
        if !gone {
            old_to_new[old] = Some(NodeId(next));
            next += 1;
        }
    }

    remap_mesh_joints(graph, &old_to_new)?;

    let map = |id: NodeId| -> Result<NodeId> {
        old_to_new[id.0].ok_or_else(|| {
            LoadError::InvariantViolation(format!("surviving node references removed node {}", id.0))
        })
    };
    let nodes = mem::take(&mut graph.nodes);
    for (old, mut node) in nodes.into_iter().enumerate() {
        if removed[old] {
            continue;
        }
        node.parent = node.parent.map(map).transpose()?;
        node.children = node.children.into_iter().map(map).collect::<Result<_>>()?;
        if let Some(skin) = &mut node.skin {
            skin.joints = skin.joints.iter().filter_map(|joint| old_to_new[joint.0]).collect();
        }
        graph.nodes.push(node);
    }
    graph.roots = mem::take(&mut graph.roots)
        .into_iter()
        .map(map)
        .collect::<Result<_>>()?;
    Ok(())
}

/// Rewrite weighted joint slots of every skinned mesh against its skin's
/// filtered joint list. Slots without positive weight are cleared to
/// joint 0 with weight 0.
fn remap_mesh_joints(graph: &mut SceneGraph, old_to_new: &[Option<NodeId>]) -> Result<()> {
    for (mesh_index, owner) in graph.skinned_meshes()? {
        let Some(Skin { joints }) = graph.node(owner).skin.clone() else {
            continue;
        };
        let filtered: Vec<NodeId> = joints.iter().filter_map(|joint| old_to_new[joint.0]).collect();
        let mut slot_map = vec![None; joints.len()];
        let mut next = 0;
        for (old_slot, joint) in joints.iter().enumerate() {
            if old_to_new[joint.0].is_some() {
                slot_map[old_slot] = Some(next);
                next += 1;
            }
        }

        let Mesh { name, skinning, .. } = &mut graph.meshes[mesh_index];
        for (vertex, weights) in skinning.iter_mut().enumerate() {
            for slot in 0..4 {
                if !(weights.weights[slot] > 0.0) {
                    weights.joints[slot] = 0;
                    weights.weights[slot] = 0.0;
                    continue;
                }
                let old_slot = weights.joints[slot] as usize;
                let old_joint = joints.get(old_slot).copied().ok_or_else(|| {
                    LoadError::InvariantViolation(format!(
                        "mesh {name:?} vertex {vertex} uses joint {old_slot} outside its skin"
                    ))
                })?;
                let Some(new_slot) = slot_map[old_slot] else {
                    return Err(LoadError::InvariantViolation(format!(
                        "mesh {name:?} vertex {vertex} is weighted to removed node {}",
                        old_joint.0
                    )));
                };
                if filtered.get(new_slot).copied() != old_to_new[old_joint.0] {
                    return Err(LoadError::InvariantViolation(format!(
                        "mesh {name:?} joint remap disagrees with skin at slot {new_slot}"
                    )));
                }
                weights.joints[slot] = new_slot as u32;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::humanoid::HumanoidBone;
    use crate::scene::{Node, SourceFormat, Vertex, VertexWeights};

    /// root(hips) -> helper -> [a, b, c] with a and c weighted, plus an
    /// empty tail chain under root and a skinned mesh holder.
    fn rig() -> SceneGraph {
        let mut graph = SceneGraph::new("rig", SourceFormat::Pmx);
        let root = graph.add_node(Node::new("root"));
        let helper = graph.add_node(Node::new("helper"));
        let a = graph.add_node(Node::new("a"));
        let b = graph.add_node(Node::new("b"));
        let tail = graph.add_node(Node::new("tail"));
        let tail_end = graph.add_node(Node::new("tail_end"));
        let c = graph.add_node(Node::new("c"));
        graph.attach(root, helper);
        graph.attach(helper, a);
        graph.attach(helper, b);
        graph.attach(helper, c);
        graph.attach(root, tail);
        graph.attach(tail, tail_end);
        graph.node_mut(root).humanoid_bone = Some(HumanoidBone::Hips);
        graph.node_mut(root).translation = Vector3::new(0.0, 1.0, 0.0);
        graph.node_mut(helper).translation = Vector3::new(0.0, 2.0, 0.0);
        graph.node_mut(a).translation = Vector3::new(1.0, 0.0, 0.0);
        graph.node_mut(c).translation = Vector3::new(-1.0, 0.0, 0.0);

        graph.meshes.push(Mesh {
            name: "body".into(),
            vertices: vec![Vertex::default(); 2],
            skinning: vec![
                VertexWeights::single(2),
                VertexWeights {
                    joints: [3, 0, 0, 0],
                    weights: [0.5, 0.5, 0.0, 0.0],
                },
            ],
            ..Mesh::default()
        });
        let holder = graph.add_node(Node::new("__mesh__"));
        graph.node_mut(holder).mesh = Some(0);
        graph.node_mut(holder).skin = Some(Skin {
            joints: vec![root, helper, a, c],
        });
        graph.collect_roots();
        graph.count_weighted_vertices().unwrap();
        graph
    }

    #[test]
    fn given_rig_when_pruning_then_only_mesh_tagged_or_weighted_nodes_survive() {
        let mut graph = rig();

        let summary = prune(&mut graph).unwrap();

        let names: Vec<&str> = graph.nodes.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["root", "a", "c", "__mesh__"]);
        assert_eq!(summary.removed.len(), 4);
        assert!(graph.nodes.iter().all(|node| !node.is_removable()));
    }

    #[test]
    fn given_spliced_parent_when_pruning_then_children_keep_order_and_world_position() {
        let mut graph = rig();

        prune(&mut graph).unwrap();
        update_world_positions(&mut graph);

        let root = graph.find_by_name("root").unwrap();
        let a = graph.find_by_name("a").unwrap();
        let c = graph.find_by_name("c").unwrap();
        assert_eq!(graph.node(root).children, vec![a, c]);
        assert_eq!(graph.node(a).parent, Some(root));
        assert!((graph.node(a).world_position - Vector3::new(1.0, 3.0, 0.0)).norm() < 1e-6);
        assert!((graph.node(c).world_position - Vector3::new(-1.0, 3.0, 0.0)).norm() < 1e-6);
        assert!((graph.node(a).translation - Vector3::new(1.0, 2.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn given_pruned_rig_when_pruning_again_then_nothing_is_removed() {
        let mut graph = rig();
        prune(&mut graph).unwrap();
        let count = graph.nodes.len();

        let second = prune(&mut graph).unwrap();

        assert!(second.removed.is_empty());
        assert_eq!(graph.nodes.len(), count);
    }

    #[test]
    fn given_skinned_mesh_when_pruning_then_joint_indices_follow_filtered_skin() {
        let mut graph = rig();

        prune(&mut graph).unwrap();

        let holder = graph.find_by_name("__mesh__").unwrap();
        let skin = graph.node(holder).skin.clone().unwrap();
        let a = graph.find_by_name("a").unwrap();
        let c = graph.find_by_name("c").unwrap();
        assert_eq!(skin.joints, vec![NodeId(0), a, c]);
        let skinning = &graph.meshes[0].skinning;
        assert_eq!(skin.joints[skinning[0].joints[0] as usize], a);
        assert_eq!(skin.joints[skinning[1].joints[0] as usize], c);
        assert_eq!(skin.joints[skinning[1].joints[1] as usize], NodeId(0));
    }

    #[test]
    fn given_zero_weight_slot_with_stale_index_when_pruning_then_slot_is_reset() {
        let mut graph = rig();
        graph.meshes[0].skinning[0].joints[3] = 99;

        prune(&mut graph).unwrap();

        assert_eq!(graph.meshes[0].skinning[0].joints[3], 0);
        assert_eq!(graph.meshes[0].skinning[0].weights[3], 0.0);
    }

    #[test]
    fn given_negative_weight_slot_when_pruning_then_weight_and_index_are_cleared() {
        let mut graph = rig();
        graph.meshes[0].skinning[0].joints[2] = 7;
        graph.meshes[0].skinning[0].weights[2] = -0.25;

        prune(&mut graph).unwrap();

        assert_eq!(graph.meshes[0].skinning[0].joints[2], 0);
        assert_eq!(graph.meshes[0].skinning[0].weights[2], 0.0);
    }

    #[test]
    fn given_weighted_joint_on_removable_node_when_pruning_then_invariant_violation() {
        let mut graph = rig();
        // weights `helper` without refreshing its vertex count
        graph.meshes[0].skinning[0] = VertexWeights::single(1);

        let result = prune(&mut graph);

        assert!(matches!(result, Err(LoadError::InvariantViolation(_))));
    }

    #[test]
    fn given_removable_root_when_pruning_then_children_take_its_root_position() {
        let mut graph = SceneGraph::new("roots", SourceFormat::Gltf);
        let first = graph.add_node(Node::new("first"));
        let scene = graph.add_node(Node::new("scene"));
        let last = graph.add_node(Node::new("last"));
        let left = graph.add_node(Node::new("left"));
        let right = graph.add_node(Node::new("right"));
        graph.attach(scene, left);
        graph.attach(scene, right);
        for id in [first, left, right, last] {
            graph.node_mut(id).humanoid_bone = Some(HumanoidBone::Head);
        }
        graph.collect_roots();

        prune(&mut graph).unwrap();

        let names: Vec<&str> = graph
            .roots
            .iter()
            .map(|&root| graph.node(root).name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "left", "right", "last"]);
    }
}
