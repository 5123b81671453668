//! Builds a [`SceneGraph`] from a decoded PMD or PMX model.
//!
//! MMD stores absolute bone positions in a left-handed space measured in
//! MMD units. Everything is flipped on Z, scaled, and converted to
//! parent-relative translations. One sentinel root node owns the single
//! mesh, and its skin lists every bone in file order.

use log::info;
use nalgebra::Vector3;

use crate::error::{LoadError, Result};
use crate::mmd::MmdModel;
use crate::mmd::pmd::{NO_BONE, PmdModel};
use crate::mmd::pmx::{Deform, PmxIndex, PmxModel};
use crate::transform;

use super::{
    Material, Mesh, Node, NodeId, SceneGraph, Skin, SourceFormat, Submesh, Texture, TextureData,
    Vertex, VertexWeights,
};

/// Name of the synthetic root that owns the MMD mesh.
pub const MESH_NODE_NAME: &str = "__mesh__";

/// Meters per MMD unit, assuming a 20-unit model is 1.59 m tall.
pub const DEFAULT_MMD_SCALE: f32 = 1.59 / 20.0;

pub fn load(model: &MmdModel, scale: f32) -> Result<SceneGraph> {
    match model {
        MmdModel::Pmx(model) => from_pmx(model, scale),
        MmdModel::Pmd(model) => from_pmd(model, scale),
    }
}

fn to_scene(position: [f32; 3], scale: f32) -> Vector3<f32> {
    Vector3::new(position[0], position[1], -position[2]) * scale
}

fn flip_z([x, y, z]: [f32; 3]) -> [f32; 3] {
    [x, y, -z]
}

fn external_texture(path: &str) -> Texture {
    let mime = image::ImageFormat::from_path(path)
        .ok()
        .map(|format| format.to_mime_type().to_string());
    Texture {
        name: path.to_string(),
        data: TextureData::External {
            path: path.to_string(),
            mime,
        },
    }
}

// ─── PMX ──────────────────────────────────────────────────────────────────────

pub fn from_pmx(model: &PmxModel, scale: f32) -> Result<SceneGraph> {
    let mut graph = SceneGraph::new(model.name.clone(), SourceFormat::Pmx);
    let bone_count = model.bones.len();

    let bones = model
        .bones
        .iter()
        .map(|bone| (bone.name.clone(), bone.parent.get(), bone.position))
        .collect::<Vec<_>>();

    let vertices = model
        .vertices
        .iter()
        .map(|vertex| Vertex {
            position: to_scene(vertex.position, scale).into(),
            normal: flip_z(vertex.normal),
            uv: vertex.uv,
        })
        .collect();
    let skinning = model
        .vertices
        .iter()
        .enumerate()
        .map(|(index, vertex)| pmx_weights(&vertex.deform, bone_count, index))
        .collect::<Result<Vec<_>>>()?;

    graph.textures = model.textures.iter().map(|path| external_texture(path)).collect();
    let mut counts = Vec::with_capacity(model.materials.len());
    for (index, source) in model.materials.iter().enumerate() {
        let mut material = Material::new(source.name.clone());
        material.base_color = source.diffuse;
        if let Some(texture) = source.texture.get() {
            if texture >= graph.textures.len() {
                return Err(LoadError::malformed(format!(
                    "material {index} references texture {texture} of {}",
                    graph.textures.len()
                )));
            }
            material.color_texture = Some(texture);
        }
        graph.materials.push(material);
        counts.push(usize::try_from(source.index_count).map_err(|_| {
            LoadError::malformed(format!(
                "material {index} has negative index count {}",
                source.index_count
            ))
        })?);
    }

    let mesh = build_mesh(vertices, skinning, &model.indices, &counts)?;
    finish(graph, &bones, mesh, scale)
}

fn pmx_weights(deform: &Deform, bone_count: usize, vertex: usize) -> Result<VertexWeights> {
    let joint = |index: &PmxIndex| -> Result<Option<u32>> {
        match index.get() {
            None => Ok(None),
            Some(bone) if bone < bone_count => Ok(Some(bone as u32)),
            Some(bone) => Err(LoadError::malformed(format!(
                "vertex {vertex} references bone {bone} of {bone_count}"
            ))),
        }
    };
    let mut weights = VertexWeights::default();
    let mut set = |slot: usize, index: &PmxIndex, weight: f32| -> Result<()> {
        if let Some(bone) = joint(index)? {
            weights.joints[slot] = bone;
            weights.weights[slot] = weight;
        }
        Ok(())
    };
    match deform {
        Deform::Bdef1 { bone } => set(0, bone, 1.0)?,
        Deform::Bdef2 { bones, weight } | Deform::Sdef { bones, weight, .. } => {
            let weight = weight.clamp(0.0, 1.0);
            set(0, &bones[0], weight)?;
            set(1, &bones[1], 1.0 - weight)?;
        }
        Deform::Bdef4 {
            bones,
            weights: stored,
        } => {
            for slot in 0..4 {
                set(slot, &bones[slot], stored[slot])?;
            }
        }
    }
    Ok(weights.normalized())
}

// ─── PMD ──────────────────────────────────────────────────────────────────────

pub fn from_pmd(model: &PmdModel, scale: f32) -> Result<SceneGraph> {
    let mut graph = SceneGraph::new(model.name.clone(), SourceFormat::Pmd);
    let bone_count = model.bones.len();

    let bones = model
        .bones
        .iter()
        .map(|bone| {
            let parent = (bone.parent != NO_BONE).then_some(usize::from(bone.parent));
            (bone.name.clone(), parent, bone.position)
        })
        .collect::<Vec<_>>();

    let vertices = model
        .vertices
        .iter()
        .map(|vertex| Vertex {
            position: to_scene(vertex.position, scale).into(),
            normal: flip_z(vertex.normal),
            uv: vertex.uv,
        })
        .collect();
    let skinning = model
        .vertices
        .iter()
        .enumerate()
        .map(|(index, vertex)| {
            let first_weight = f32::from(vertex.weight.min(100)) / 100.0;
            let mut weights = VertexWeights::pair(0, 0, first_weight);
            for slot in 0..2 {
                let bone = vertex.bones[slot];
                if bone == NO_BONE {
                    weights.weights[slot] = 0.0;
                } else if usize::from(bone) < bone_count {
                    weights.joints[slot] = u32::from(bone);
                } else {
                    return Err(LoadError::malformed(format!(
                        "vertex {index} references bone {bone} of {bone_count}"
                    )));
                }
            }
            Ok(weights.normalized())
        })
        .collect::<Result<Vec<_>>>()?;

    let mut counts = Vec::with_capacity(model.materials.len());
    for (index, source) in model.materials.iter().enumerate() {
        let mut material = Material::new(format!("material{index}"));
        material.base_color = [
            source.diffuse[0],
            source.diffuse[1],
            source.diffuse[2],
            source.alpha,
        ];
        // "color.bmp*sphere.sph": the part after '*' is a sphere map.
        let path = source.texture_file.split('*').next().unwrap_or_default();
        if !path.is_empty() {
            let texture = match graph.textures.iter().position(|texture| texture.name == path) {
                Some(existing) => existing,
                None => {
                    graph.textures.push(external_texture(path));
                    graph.textures.len() - 1
                }
            };
            material.color_texture = Some(texture);
        }
        graph.materials.push(material);
        counts.push(source.index_count as usize);
    }

    let indices = model.indices.iter().map(|&index| u32::from(index)).collect::<Vec<_>>();
    let mesh = build_mesh(vertices, skinning, &indices, &counts)?;
    finish(graph, &bones, mesh, scale)
}

// ─── Shared assembly ──────────────────────────────────────────────────────────

/// Reverses triangle winding and splits the index buffer into consecutive
/// per-material ranges.
fn build_mesh(
    vertices: Vec<Vertex>,
    skinning: Vec<VertexWeights>,
    indices: &[u32],
    material_index_counts: &[usize],
) -> Result<Mesh> {
    if indices.len() % 3 != 0 {
        return Err(LoadError::malformed(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    if let Some(bad) = indices.iter().find(|index| **index as usize >= vertices.len()) {
        return Err(LoadError::malformed(format!(
            "index {bad} exceeds the {} vertices",
            vertices.len()
        )));
    }
    let flipped = indices
        .chunks_exact(3)
        .flat_map(|triangle| [triangle[2], triangle[1], triangle[0]])
        .collect();

    let mut submeshes = Vec::with_capacity(material_index_counts.len());
    let mut offset = 0usize;
    for (material, &count) in material_index_counts.iter().enumerate() {
        let end = offset.checked_add(count).filter(|end| *end <= indices.len());
        let Some(end) = end else {
            return Err(LoadError::malformed(format!(
                "material {material} draws {count} indices from {offset} but only {} exist",
                indices.len()
            )));
        };
        submeshes.push(Submesh {
            index_offset: offset,
            index_count: count,
            material: Some(material),
        });
        offset = end;
    }

    Ok(Mesh {
        name: "mesh".to_string(),
        vertices,
        skinning,
        indices: flipped,
        submeshes,
    })
}

/// Adds one node per bone plus the mesh sentinel, links parents, and turns
/// absolute bone positions into parent-relative translations.
fn finish(
    mut graph: SceneGraph,
    bones: &[(String, Option<usize>, [f32; 3])],
    mesh: Mesh,
    scale: f32,
) -> Result<SceneGraph> {
    for (name, _, position) in bones {
        let mut node = Node::new(name.clone());
        node.world_position = to_scene(*position, scale);
        graph.add_node(node);
    }
    for (index, (name, parent, _)) in bones.iter().enumerate() {
        let Some(parent) = *parent else {
            continue;
        };
        if parent >= bones.len() || parent == index {
            return Err(LoadError::malformed(format!(
                "bone {index} ({name:?}) has invalid parent {parent}"
            )));
        }
        graph.attach(NodeId(parent), NodeId(index));
    }

    let joints = (0..bones.len()).map(NodeId).collect();
    graph.meshes.push(mesh);
    let mut holder = Node::new(MESH_NODE_NAME);
    holder.mesh = Some(0);
    holder.skin = Some(Skin { joints });
    graph.add_node(holder);

    graph.collect_roots();
    graph.verify_forest()?;
    transform::local_from_world(&mut graph);
    graph.count_weighted_vertices()?;

    info!(
        "{:?} {:?}: {} bones, {} vertices, {} triangles, {} materials",
        graph.source,
        graph.name,
        bones.len(),
        graph.meshes[0].vertices.len(),
        graph.meshes[0].triangle_count(),
        graph.materials.len()
    );
    Ok(graph)
}
