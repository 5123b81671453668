//! Staged load: detect, build, classify, prune, refresh world positions.

use std::{fs, path::Path};

use anyhow::Context;
use log::{debug, info};

use crate::error::Result;
use crate::humanoid::classify::classify;
use crate::humanoid::{ALL_BONES, REQUIRED_BONES};
use crate::logging::ResultExt;
use crate::mmd;
use crate::options::LoadOptions;
use crate::prune::prune;
use crate::scene::{self, SceneGraph};
use crate::transform::update_world_positions;
use crate::types::{LoadReport, ValidationIssue};

/// A normalized scene graph and the report describing how it was produced.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub graph: SceneGraph,
    pub report: LoadReport,
}

/// Load a glTF, GLB, VRM, PMX or PMD model from memory.
///
/// The container is detected from its leading bytes: the GLB magic, a JSON
/// object, otherwise an MMD signature.
pub fn load_model(data: &[u8], options: &LoadOptions) -> Result<LoadedModel> {
    let (mut graph, mut issues) = build_graph(data, options).log_error(Some("build"))?;
    debug!(
        "built {:?} from {:?}: {} nodes",
        graph.name,
        graph.source,
        graph.nodes.len()
    );

    issues.extend(classify(&mut graph, options.classify).log_error(Some("classify"))?);

    let node_count_before_prune = graph.nodes.len();
    let removed_nodes = if options.prune {
        prune(&mut graph).log_error(Some("prune"))?.removed
    } else {
        Vec::new()
    };
    update_world_positions(&mut graph);

    let report = build_report(&graph, node_count_before_prune, removed_nodes, issues);
    info!(
        "loaded {:?}: {} nodes ({} pruned), {} meshes, {} mapped bones",
        report.model_name,
        report.node_count,
        report.removed_nodes.len(),
        report.mesh_count,
        report.mapped_bones.len()
    );
    Ok(LoadedModel { graph, report })
}

/// Load a model file. An unnamed model takes the file stem as its name.
pub fn load_model_from_path(path: &Path, options: &LoadOptions) -> anyhow::Result<LoadedModel> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    let mut model = load_model(&data, options)
        .with_context(|| format!("failed to load model: {}", path.display()))?;

    if model.graph.name.is_empty()
        && let Some(stem) = path.file_stem()
    {
        model.graph.name = stem.to_string_lossy().to_string();
        model.report.model_name = model.graph.name.clone();
    }
    Ok(model)
}

fn build_graph(
    data: &[u8],
    options: &LoadOptions,
) -> Result<(SceneGraph, Vec<ValidationIssue>)> {
    if crate::gltf::is_glb(data) || crate::gltf::is_json(data) {
        let document = crate::gltf::parse(data)?;
        return scene::gltf::load(&document);
    }
    let model = mmd::decode(data)?;
    let graph = scene::mmd::load(&model, options.mmd_scale)?;
    Ok((graph, Vec::new()))
}

fn build_report(
    graph: &SceneGraph,
    node_count_before_prune: usize,
    removed_nodes: Vec<String>,
    issues: Vec<ValidationIssue>,
) -> LoadReport {
    let mapped_bones = ALL_BONES
        .iter()
        .filter_map(|&bone| {
            graph
                .find_humanoid(bone)
                .map(|id| (bone.as_str().to_string(), graph.node(id).name.clone()))
        })
        .collect();
    let missing_required_bones = REQUIRED_BONES
        .iter()
        .filter(|&&bone| graph.find_humanoid(bone).is_none())
        .map(|bone| bone.as_str().to_string())
        .collect();

    LoadReport {
        model_name: graph.name.clone(),
        source: graph.source,
        node_count_before_prune,
        node_count: graph.nodes.len(),
        removed_nodes,
        mesh_count: graph.meshes.len(),
        total_vertices: graph.meshes.iter().map(|mesh| mesh.vertices.len()).sum(),
        total_polygons: graph.meshes.iter().map(|mesh| mesh.triangle_count()).sum(),
        mapped_bones,
        missing_required_bones,
        issues,
    }
}
