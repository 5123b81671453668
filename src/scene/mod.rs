//! Unified node/mesh/skin graph shared by every source format.

pub mod gltf;
pub mod mmd;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};
use crate::humanoid::HumanoidBone;

// ─── Handles ──────────────────────────────────────────────────────────────────

/// Stable handle of a node inside [`SceneGraph::nodes`].
///
/// Handles stay valid until the pruner compacts the arena, which rewrites
/// every handle it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

// ─── Nodes ────────────────────────────────────────────────────────────────────

/// Ordered joint list. Mesh joint indices index into this list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skin {
    pub joints: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
    /// Index into [`SceneGraph::meshes`].
    pub mesh: Option<usize>,
    pub skin: Option<Skin>,
    pub humanoid_bone: Option<HumanoidBone>,
    /// Vertices with nonzero weight on this node, across all meshes.
    pub vertex_count: usize,
    /// Cached by [`crate::transform::update_world_positions`].
    pub world_position: Vector3<f32>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            mesh: None,
            skin: None,
            humanoid_bone: None,
            vertex_count: 0,
            world_position: Vector3::zeros(),
        }
    }

    /// A node the pruner may delete: no mesh, no humanoid tag, no weighted vertices.
    pub fn is_removable(&self) -> bool {
        self.mesh.is_none() && self.humanoid_bone.is_none() && self.vertex_count == 0
    }
}

// ─── Meshes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Four joint/weight slots per vertex. Unused slots hold index 0 and weight 0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VertexWeights {
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

impl VertexWeights {
    pub fn single(joint: u32) -> Self {
        Self {
            joints: [joint, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn pair(first: u32, second: u32, first_weight: f32) -> Self {
        let first_weight = first_weight.clamp(0.0, 1.0);
        Self {
            joints: [first, second, 0, 0],
            weights: [first_weight, 1.0 - first_weight, 0.0, 0.0],
        }
    }

    /// Slots carrying influence, as `(slot, joint, weight)`.
    pub fn active(&self) -> impl Iterator<Item = (usize, u32, f32)> + '_ {
        (0..4)
            .filter(|&slot| self.weights[slot] > 0.0)
            .map(|slot| (slot, self.joints[slot], self.weights[slot]))
    }

    pub fn weight_sum(&self) -> f32 {
        self.active().map(|(_, _, weight)| weight).sum()
    }

    /// Rescales the weights so they sum to one, and zeroes the joint index
    /// of every empty slot. An all-zero vertex stays all zero.
    pub fn normalized(mut self) -> Self {
        for slot in 0..4 {
            if !(self.weights[slot] > 0.0) {
                self.weights[slot] = 0.0;
                self.joints[slot] = 0;
            }
        }
        let sum = self.weight_sum();
        if sum > 0.0 && (sum - 1.0).abs() > f32::EPSILON {
            for weight in &mut self.weights {
                *weight /= sum;
            }
        }
        self
    }
}

/// A contiguous range of the index buffer drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submesh {
    pub index_offset: usize,
    pub index_count: usize,
    pub material: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    /// Parallel to `vertices`, or empty for an unskinned mesh.
    pub skinning: Vec<VertexWeights>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<Submesh>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TextureData {
    /// Image bytes stored inside the asset.
    Embedded { mime: String, bytes: Vec<u8> },
    /// Path relative to the model file, as MMD stores it.
    External { path: String, mime: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub name: String,
    pub data: TextureData,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    /// Index into [`SceneGraph::textures`].
    pub color_texture: Option<usize>,
    pub base_color: [f32; 4],
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color_texture: None,
            base_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

// ─── Graph ────────────────────────────────────────────────────────────────────

/// Where a graph was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Gltf,
    Vrm0,
    Vrm1,
    Pmd,
    Pmx,
}

impl SourceFormat {
    /// VRM documents carry their own humanoid mapping.
    pub fn has_humanoid_metadata(self) -> bool {
        matches!(self, Self::Vrm0 | Self::Vrm1)
    }
}

/// Arena-backed forest of nodes plus the meshes, materials and textures they use.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    pub name: String,
    pub source: SourceFormat,
    pub nodes: Vec<Node>,
    pub roots: Vec<NodeId>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
}

impl SceneGraph {
    pub fn new(name: impl Into<String>, source: SourceFormat) -> Self {
        Self {
            name: name.into(),
            source,
            nodes: Vec::new(),
            roots: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Appends `child` to `parent`'s children. `child` must be detached.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Removes `id` from its parent's child list, or from the roots.
    pub fn detach(&mut self, id: NodeId) {
        match self.nodes[id.0].parent.take() {
            Some(parent) => self.nodes[parent.0].children.retain(|&child| child != id),
            None => self.roots.retain(|&root| root != id),
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(NodeId)
    }

    pub fn find_humanoid(&self, bone: HumanoidBone) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.humanoid_bone == Some(bone))
            .map(NodeId)
    }

    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.nodes[node.0].parent;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    /// Pre-order walk of the forest, roots first, children in order.
    pub fn traverse(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Rebuilds `roots` as every parentless node, in arena order.
    pub fn collect_roots(&mut self) {
        self.roots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(index, _)| NodeId(index))
            .collect();
    }

    /// Checks that parent and child links agree and that every node is
    /// reachable from exactly one root, which rules out cycles.
    pub fn verify_forest(&self) -> Result<()> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = Vec::new();
        for &root in &self.roots {
            if self.nodes[root.0].parent.is_some() {
                return Err(LoadError::malformed(format!(
                    "root node {:?} has a parent",
                    self.nodes[root.0].name
                )));
            }
            stack.push(root);
        }
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                return Err(LoadError::malformed(format!(
                    "node {:?} is reachable twice",
                    self.nodes[id.0].name
                )));
            }
            for &child in &self.nodes[id.0].children {
                if self.nodes[child.0].parent != Some(id) {
                    return Err(LoadError::malformed(format!(
                        "node {:?} is listed as a child of {:?} but has another parent",
                        self.nodes[child.0].name, self.nodes[id.0].name
                    )));
                }
                stack.push(child);
            }
        }
        if let Some(index) = seen.iter().position(|visited| !visited) {
            return Err(LoadError::malformed(format!(
                "node {:?} is part of a parent cycle",
                self.nodes[index].name
            )));
        }
        Ok(())
    }

    /// Each skinned mesh paired with the first node that draws it with a skin.
    ///
    /// Joint indices are only meaningful against one joint list, so a mesh
    /// drawn by a second node with a different skin is rejected.
    pub fn skinned_meshes(&self) -> Result<Vec<(usize, NodeId)>> {
        let mut owners: Vec<Option<NodeId>> = vec![None; self.meshes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            let (Some(mesh), Some(skin)) = (node.mesh, &node.skin) else {
                continue;
            };
            match owners[mesh] {
                None => owners[mesh] = Some(NodeId(index)),
                Some(first) if self.nodes[first.0].skin.as_ref() != Some(skin) => {
                    return Err(LoadError::UnsupportedFeature(format!(
                        "mesh {:?} is drawn by {:?} and {:?} with different skins",
                        self.meshes[mesh].name, self.nodes[first.0].name, node.name
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(owners
            .into_iter()
            .enumerate()
            .filter_map(|(mesh, owner)| owner.map(|owner| (mesh, owner)))
            .filter(|(mesh, _)| !self.meshes[*mesh].skinning.is_empty())
            .collect())
    }

    /// Recomputes every node's `vertex_count` from the skinned meshes.
    ///
    /// A weighted slot that points outside its skin's joint list is malformed
    /// input. Zero-weight slots are ignored.
    pub fn count_weighted_vertices(&mut self) -> Result<()> {
        for node in &mut self.nodes {
            node.vertex_count = 0;
        }
        for (mesh_index, owner) in self.skinned_meshes()? {
            let joints = match &self.nodes[owner.0].skin {
                Some(skin) => skin.joints.clone(),
                None => continue,
            };
            let mesh = &self.meshes[mesh_index];
            let mut counts = vec![0usize; self.nodes.len()];
            for (vertex, weights) in mesh.skinning.iter().enumerate() {
                let mut touched: [Option<NodeId>; 4] = [None; 4];
                for (slot, joint, _) in weights.active() {
                    let node = joints.get(joint as usize).copied().ok_or_else(|| {
                        LoadError::malformed(format!(
                            "mesh {:?} vertex {vertex} uses joint {joint} but its skin has {} joints",
                            mesh.name,
                            joints.len()
                        ))
                    })?;
                    if !touched.contains(&Some(node)) {
                        touched[slot] = Some(node);
                        counts[node.0] += 1;
                    }
                }
            }
            for (node, count) in self.nodes.iter_mut().zip(counts) {
                node.vertex_count += count;
            }
        }
        Ok(())
    }
}
