//! Builds a [`SceneGraph`] from a parsed glTF/VRM document.

use log::{debug, info};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde_json::Value;

use crate::error::{LoadError, Result};
use crate::gltf::GltfDocument;
use crate::gltf::accessor::AccessorReader;
use crate::gltf::schema::{self, Checked, Mode, Root, Semantic, to_usize};
use crate::humanoid::HumanoidBone;
use crate::types::ValidationIssue;

use super::{
    Material, Mesh, Node, NodeId, SceneGraph, Skin, SourceFormat, Submesh, Texture, TextureData,
    Vertex, VertexWeights,
};

/// Decodes textures, materials, meshes, nodes, skins and humanoid metadata,
/// in that order.
pub fn load(document: &GltfDocument<'_>) -> Result<(SceneGraph, Vec<ValidationIssue>)> {
    let root = &document.root;
    let reader = document.accessors();
    let mut issues = Vec::new();

    let source = if document.extension("/VRM").is_some() {
        SourceFormat::Vrm0
    } else if document.extension("/VRMC_vrm").is_some() {
        SourceFormat::Vrm1
    } else {
        SourceFormat::Gltf
    };
    let mut graph = SceneGraph::new(extract_model_name(document).unwrap_or_default(), source);

    graph.textures = load_textures(root, &reader)?;
    graph.materials = load_materials(root, graph.textures.len())?;
    graph.meshes = root
        .meshes
        .iter()
        .enumerate()
        .map(|(index, mesh)| load_mesh(root, &reader, index, mesh))
        .collect::<Result<_>>()?;

    load_nodes(root, &mut graph)?;
    apply_humanoid_metadata(document, &mut graph, &mut issues);
    graph.count_weighted_vertices()?;

    info!(
        "glTF ({source:?}): {} nodes, {} meshes, {} materials, {} textures",
        graph.nodes.len(),
        graph.meshes.len(),
        graph.materials.len(),
        graph.textures.len()
    );
    Ok((graph, issues))
}

/// VRM 0.x stores `meta.title`, VRM 1.0 stores `meta.name`.
fn extract_model_name(document: &GltfDocument<'_>) -> Option<String> {
    document
        .extension("/VRM/meta/title")
        .or_else(|| document.extension("/VRMC_vrm/meta/name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
}

// ─── Textures and materials ───────────────────────────────────────────────────

fn load_textures(root: &Root, reader: &AccessorReader<'_>) -> Result<Vec<Texture>> {
    root.textures
        .iter()
        .enumerate()
        .map(|(index, texture)| {
            let source = texture.source.value();
            let (mime, bytes) = reader.image_mime_bytes(source)?;
            Ok(Texture {
                name: texture
                    .name
                    .clone()
                    .or_else(|| root.images.get(source).and_then(|image| image.name.clone()))
                    .unwrap_or_else(|| format!("texture.{index}")),
                data: TextureData::Embedded {
                    mime,
                    bytes: bytes.to_vec(),
                },
            })
        })
        .collect()
}

fn load_materials(root: &Root, texture_count: usize) -> Result<Vec<Material>> {
    root.materials
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let mut material = Material::new(
                source
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("material.{index}")),
            );
            let pbr = &source.pbr_metallic_roughness;
            material.base_color = pbr.base_color_factor.0;
            if let Some(info) = &pbr.base_color_texture {
                let texture = info.index.value();
                if texture >= texture_count {
                    return Err(LoadError::malformed(format!(
                        "material {index} references texture {texture} of {texture_count}"
                    )));
                }
                material.color_texture = Some(texture);
            }
            Ok(material)
        })
        .collect()
}

// ─── Meshes ───────────────────────────────────────────────────────────────────

fn load_mesh(
    root: &Root,
    reader: &AccessorReader<'_>,
    mesh_index: usize,
    source: &schema::Mesh,
) -> Result<Mesh> {
    let name = source
        .name
        .clone()
        .unwrap_or_else(|| format!("mesh{mesh_index}"));

    for (prim_index, primitive) in source.primitives.iter().enumerate() {
        match &primitive.mode {
            Checked::Valid(Mode::Triangles) => {}
            Checked::Valid(mode) => {
                return Err(LoadError::UnsupportedFeature(format!(
                    "mesh {name:?} primitive {prim_index} uses mode {mode:?}; only triangle lists are supported"
                )));
            }
            Checked::Invalid => {
                return Err(LoadError::malformed(format!(
                    "mesh {name:?} primitive {prim_index} has an unknown mode"
                )));
            }
        }
        if schema::attribute(primitive, Semantic::Positions).is_none() {
            return Err(LoadError::malformed(format!(
                "mesh {name:?} primitive {prim_index} has no POSITION"
            )));
        }
        if let Some(material) = primitive.material.map(|index| index.value())
            && material >= root.materials.len()
        {
            return Err(LoadError::malformed(format!(
                "mesh {name:?} primitive {prim_index} references material {material} of {}",
                root.materials.len()
            )));
        }
    }

    // Exporters such as UniVRM emit one shared vertex buffer per mesh and
    // split only the index buffers by material.
    let shared = source.primitives.len() > 1
        && source
            .primitives
            .iter()
            .all(|primitive| primitive.attributes == source.primitives[0].attributes);
    let skinned = source
        .primitives
        .iter()
        .any(|primitive| schema::attribute(primitive, Semantic::Joints(0)).is_some());

    let accessor_count = |index: Option<usize>| {
        index
            .and_then(|index| root.accessors.get(index))
            .map_or(0, |accessor| to_usize(accessor.count))
    };
    let positions =
        |primitive: &schema::Primitive| schema::attribute(primitive, Semantic::Positions);
    let vertex_capacity: usize = if shared {
        accessor_count(positions(&source.primitives[0]))
    } else {
        source
            .primitives
            .iter()
            .map(|primitive| accessor_count(positions(primitive)))
            .sum()
    };
    let index_capacity: usize = source
        .primitives
        .iter()
        .map(|primitive| match primitive.indices {
            Some(indices) => accessor_count(Some(indices.value())),
            None => accessor_count(positions(primitive)),
        })
        .sum();

    let mut mesh = Mesh {
        name,
        vertices: Vec::with_capacity(vertex_capacity),
        skinning: Vec::with_capacity(if skinned { vertex_capacity } else { 0 }),
        indices: Vec::with_capacity(index_capacity),
        submeshes: Vec::with_capacity(source.primitives.len()),
    };

    for (prim_index, primitive) in source.primitives.iter().enumerate() {
        let (base, vertex_count) = if shared && prim_index > 0 {
            (0, mesh.vertices.len())
        } else {
            let base = mesh.vertices.len();
            let count = append_vertices(reader, &mut mesh, primitive, skinned)?;
            (if shared { 0 } else { base }, count)
        };

        let local = match primitive.indices {
            Some(indices) => reader.get_index_accessor(indices.value())?.into_u32(),
            None => (0..vertex_count as u32).collect(),
        };
        if let Some(bad) = local.iter().find(|index| **index as usize >= vertex_count) {
            return Err(LoadError::malformed(format!(
                "mesh {:?} primitive {prim_index} index {bad} exceeds its {vertex_count} vertices",
                mesh.name
            )));
        }

        mesh.submeshes.push(Submesh {
            index_offset: mesh.indices.len(),
            index_count: local.len(),
            material: primitive.material.map(|index| index.value()),
        });
        mesh.indices
            .extend(local.into_iter().map(|index| index + base as u32));
    }

    debug!(
        "mesh {:?}: {} vertices, {} triangles, {} submeshes{}",
        mesh.name,
        mesh.vertices.len(),
        mesh.triangle_count(),
        mesh.submeshes.len(),
        if shared { " (shared attributes)" } else { "" }
    );
    Ok(mesh)
}

/// Appends one primitive's attributes and returns its vertex count.
fn append_vertices(
    reader: &AccessorReader<'_>,
    mesh: &mut Mesh,
    primitive: &schema::Primitive,
    skinned: bool,
) -> Result<usize> {
    let attribute = |semantic| schema::attribute(primitive, semantic);

    let position = attribute(Semantic::Positions).ok_or_else(|| {
        LoadError::malformed(format!("mesh {:?} primitive has no POSITION", mesh.name))
    })?;
    let positions: Vec<[f32; 3]> = reader.get_typed_accessor(position)?;
    let count = positions.len();
    let normals: Vec<[f32; 3]> = match attribute(Semantic::Normals) {
        Some(index) => expect_len(reader.get_typed_accessor(index)?, count, "NORMAL")?,
        None => vec![[0.0; 3]; count],
    };
    let uvs: Vec<[f32; 2]> = match attribute(Semantic::TexCoords(0)) {
        Some(index) => expect_len(reader.get_typed_accessor(index)?, count, "TEXCOORD_0")?,
        None => vec![[0.0; 2]; count],
    };

    mesh.vertices.extend(
        positions
            .into_iter()
            .zip(normals)
            .zip(uvs)
            .map(|((position, normal), uv)| Vertex {
                position,
                normal,
                uv,
            }),
    );

    if skinned {
        match (attribute(Semantic::Joints(0)), attribute(Semantic::Weights(0))) {
            (Some(joints), Some(weights)) => {
                let joints = expect_len(reader.get_joints_accessor(joints)?, count, "JOINTS_0")?;
                let weights =
                    expect_len(reader.get_weights_accessor(weights)?, count, "WEIGHTS_0")?;
                mesh.skinning
                    .extend(joints.into_iter().zip(weights).map(|(joints, weights)| {
                        VertexWeights {
                            joints: joints.map(u32::from),
                            weights,
                        }
                    }));
            }
            (None, None) => mesh
                .skinning
                .extend(std::iter::repeat_n(VertexWeights::default(), count)),
            _ => {
                return Err(LoadError::malformed(
                    "JOINTS_0 and WEIGHTS_0 must be present together",
                ));
            }
        }
    }
    Ok(count)
}

fn expect_len<T>(values: Vec<T>, count: usize, semantic: &str) -> Result<Vec<T>> {
    if values.len() != count {
        return Err(LoadError::malformed(format!(
            "{semantic} has {} elements but POSITION has {count}",
            values.len()
        )));
    }
    Ok(values)
}

// ─── Nodes and skins ──────────────────────────────────────────────────────────

fn load_nodes(root: &Root, graph: &mut SceneGraph) -> Result<()> {
    for (index, source) in root.nodes.iter().enumerate() {
        if source.matrix.is_some() {
            return Err(LoadError::UnsupportedFeature(format!(
                "node {index} uses a matrix transform"
            )));
        }
        let mut node = Node::new(
            source
                .name
                .clone()
                .unwrap_or_else(|| format!("node_{index}")),
        );
        if let Some(translation) = source.translation {
            node.translation = Vector3::from(translation);
        }
        if let Some(schema::UnitQuaternion([x, y, z, w])) = source.rotation {
            node.rotation = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
        }
        if let Some(scale) = source.scale {
            node.scale = Vector3::from(scale);
        }
        if let Some(mesh) = source.mesh.map(|index| index.value()) {
            if mesh >= graph.meshes.len() {
                return Err(LoadError::malformed(format!(
                    "node {index} references mesh {mesh} of {}",
                    graph.meshes.len()
                )));
            }
            node.mesh = Some(mesh);
        }
        graph.add_node(node);
    }

    let node_count = root.nodes.len();
    for (parent, source) in root.nodes.iter().enumerate() {
        for child in source.children.iter().flatten().map(|index| index.value()) {
            if child >= node_count {
                return Err(LoadError::malformed(format!(
                    "node {parent} lists child {child} of {node_count}"
                )));
            }
            if graph.nodes[child].parent.is_some() || child == parent {
                return Err(LoadError::malformed(format!(
                    "node {child} ({:?}) has more than one parent",
                    graph.nodes[child].name
                )));
            }
            graph.attach(NodeId(parent), NodeId(child));
        }
    }
    graph.collect_roots();
    graph.verify_forest()?;

    for (index, source) in root.nodes.iter().enumerate() {
        let Some(skin_index) = source.skin.map(|index| index.value()) else {
            continue;
        };
        let skin = root.skins.get(skin_index).ok_or_else(|| {
            LoadError::malformed(format!("node {index} references missing skin {skin_index}"))
        })?;
        let joints = skin
            .joints
            .iter()
            .map(|joint| {
                let joint = joint.value();
                if joint < node_count {
                    Ok(NodeId(joint))
                } else {
                    Err(LoadError::malformed(format!(
                        "skin {skin_index} lists joint node {joint} of {node_count}"
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        graph.nodes[index].skin = Some(Skin { joints });
    }
    Ok(())
}

// ─── Humanoid metadata ────────────────────────────────────────────────────────

fn apply_humanoid_metadata(
    document: &GltfDocument<'_>,
    graph: &mut SceneGraph,
    issues: &mut Vec<ValidationIssue>,
) {
    if let Some(bones) = document
        .extension("/VRM/humanoid/humanBones")
        .and_then(Value::as_array)
    {
        for entry in bones {
            let name = entry.get("bone").and_then(Value::as_str);
            let node = entry.get("node").and_then(Value::as_u64);
            if let (Some(name), Some(node)) = (name, node) {
                match HumanoidBone::from_vrm0_name(name) {
                    Some(bone) => assign_bone(graph, bone, node, issues),
                    None => debug!("ignoring unknown VRM0 humanoid bone {name:?}"),
                }
            }
        }
    } else if let Some(bones) = document
        .extension("/VRMC_vrm/humanoid/humanBones")
        .and_then(Value::as_object)
    {
        for (name, entry) in bones {
            let Some(node) = entry.get("node").and_then(Value::as_u64) else {
                continue;
            };
            match HumanoidBone::from_vrm1_name(name) {
                Some(bone) => assign_bone(graph, bone, node, issues),
                None => debug!("ignoring unknown VRM1 humanoid bone {name:?}"),
            }
        }
    }
}

/// The first declaration of a slot wins. A later node claiming the same
/// slot, or a node declared twice, is reported and left as it was.
fn assign_bone(
    graph: &mut SceneGraph,
    bone: HumanoidBone,
    node: u64,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(index) = usize::try_from(node)
        .ok()
        .filter(|&index| index < graph.nodes.len())
    else {
        issues.push(ValidationIssue::warning(
            "INVALID_BONE_NODE_INDEX",
            format!("humanoid bone {bone} points to missing node {node}"),
        ));
        return;
    };

    if let Some(holder) = graph.find_humanoid(bone) {
        issues.push(ValidationIssue::warning(
            "DUPLICATE_HUMANOID_BONE",
            format!(
                "{bone} already mapped to {:?}; ignoring {:?}",
                graph.node(holder).name,
                graph.nodes[index].name
            ),
        ));
        return;
    }
    let target = &mut graph.nodes[index];
    if let Some(previous) = target.humanoid_bone {
        issues.push(ValidationIssue::warning(
            "DUPLICATE_HUMANOID_BONE",
            format!(
                "node {:?} already mapped to {previous}; ignoring {bone}",
                target.name
            ),
        ));
        return;
    }
    target.humanoid_bone = Some(bone);
}
