use std::collections::BTreeMap;

use crate::error::{LoadError, Result};
use crate::options::ClassifyStrategy;
use crate::scene::{NodeId, SceneGraph};
use crate::transform::{local_from_world, update_world_positions};
use crate::types::ValidationIssue;

use super::HumanoidBone::{self, *};
use super::REQUIRED_BONES;

// ─── Name tables ──────────────────────────────────────────────────────────────

/// Substring test that rules a bone out of every slot.
enum Exclusion {
    /// An `ik` pair in any case or width.
    IkMarker,
    Contains(&'static str),
    /// Contains the first string unless it is part of the second.
    ContainsExcept(&'static str, &'static str),
}

impl Exclusion {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::IkMarker => has_ik_marker(name),
            Self::Contains(needle) => name.contains(needle),
            Self::ContainsExcept(needle, allowed) => {
                name.replace(allowed, "").contains(needle)
            }
        }
    }
}

const EXCLUSIONS: [Exclusion; 16] = [
    Exclusion::IkMarker,
    Exclusion::Contains("親"),
    Exclusion::Contains("ﾈｸﾀｲ"),
    Exclusion::ContainsExcept("先", "つま先"),
    Exclusion::Contains("髪"),
    Exclusion::Contains("アホ毛"),
    Exclusion::Contains("捩"),
    Exclusion::Contains("もみあげ"),
    Exclusion::Contains("キャンセル"),
    Exclusion::Contains("スカート"),
    Exclusion::Contains("オフセ"),
    Exclusion::Contains("袖"),
    Exclusion::Contains("Point"),
    Exclusion::Contains("リボン"),
    Exclusion::Contains("自動"),
    Exclusion::Contains("ｽｶｰﾄ"),
];

/// Exact names. `None` entries are known helper bones that never take a slot.
const EXACT_NAMES: [(&str, Option<HumanoidBone>); 37] = [
    ("操作中心", None),
    ("エッジ倍率", None),
    ("全ての親", None),
    ("センター", None),
    ("グルーブ", None),
    ("右胸１", None),
    ("左胸１", None),
    ("右胸２", None),
    ("左胸２", None),
    ("右肩P", None),
    ("左肩P", None),
    ("右肩C", None),
    ("左肩C", None),
    ("右ひじ補助", None),
    ("左ひじ補助", None),
    ("右ダミー", None),
    ("左ダミー", None),
    ("メガネ", None),
    ("舌１", None),
    ("舌２", None),
    ("舌３", None),
    ("両目", None),
    ("右目戻", None),
    ("左目戻", None),
    ("右足D", None),
    ("左足D", None),
    ("右ひざD", None),
    ("左ひざD", None),
    ("右足首D", None),
    ("左足首D", None),
    ("腰", None),
    ("__mesh__", None),
    ("下半身", Some(Hips)),
    ("上半身", Some(Spine)),
    ("上半身2", Some(Chest)),
    ("首", Some(Neck)),
    ("頭", Some(Head)),
];

/// Side-less base name with its `(left, right)` slots.
const SIDED_BASES: [(&str, HumanoidBone, HumanoidBone); 21] = [
    ("目", LeftEye, RightEye),
    ("肩", LeftShoulder, RightShoulder),
    ("腕", LeftUpperArm, RightUpperArm),
    ("ひじ", LeftLowerArm, RightLowerArm),
    ("手首", LeftHand, RightHand),
    ("足", LeftUpperLeg, RightUpperLeg),
    ("ひざ", LeftLowerLeg, RightLowerLeg),
    ("足首", LeftFoot, RightFoot),
    ("つま先", LeftToes, RightToes),
    ("人指１", LeftIndexProximal, RightIndexProximal),
    ("人指２", LeftIndexIntermediate, RightIndexIntermediate),
    ("人指３", LeftIndexDistal, RightIndexDistal),
    ("中指１", LeftMiddleProximal, RightMiddleProximal),
    ("中指２", LeftMiddleIntermediate, RightMiddleIntermediate),
    ("中指３", LeftMiddleDistal, RightMiddleDistal),
    ("薬指１", LeftRingProximal, RightRingProximal),
    ("薬指２", LeftRingIntermediate, RightRingIntermediate),
    ("薬指３", LeftRingDistal, RightRingDistal),
    ("小指１", LeftLittleProximal, RightLittleProximal),
    ("小指２", LeftLittleIntermediate, RightLittleIntermediate),
    ("小指３", LeftLittleDistal, RightLittleDistal),
];

/// Deform leg bones that take over the plain leg slots, per side.
const DEFORM_LEGS: [(&str, HumanoidBone); 8] = [
    ("左足D", LeftUpperLeg),
    ("左ひざD", LeftLowerLeg),
    ("左足首D", LeftFoot),
    ("左足先EX", LeftToes),
    ("右足D", RightUpperLeg),
    ("右ひざD", RightLowerLeg),
    ("右足首D", RightFoot),
    ("右足先EX", RightToes),
];

fn has_ik_marker(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    chars.windows(2).any(|pair| {
        matches!(pair[0], 'i' | 'I' | 'ｉ' | 'Ｉ') && matches!(pair[1], 'k' | 'K' | 'ｋ' | 'Ｋ')
    })
}

// ─── Name heuristic ───────────────────────────────────────────────────────────

/// Guess the humanoid slot of an MMD-style bone name.
///
/// Returns `Ok(None)` for helper bones and unknown names, and
/// [`LoadError::MissingSidePrefix`] for a sided base such as `腕` that lacks
/// its `左`/`右` prefix.
pub fn guess_humanoid_bone(name: &str) -> Result<Option<HumanoidBone>> {
    if EXCLUSIONS.iter().any(|exclusion| exclusion.matches(name)) {
        return Ok(None);
    }
    if let Some((_, bone)) = EXACT_NAMES.iter().find(|(exact, _)| *exact == name) {
        return Ok(*bone);
    }

    let (side, base) = if let Some(base) = name.strip_prefix('左') {
        (Some(true), base)
    } else if let Some(base) = name.strip_prefix('右') {
        (Some(false), base)
    } else {
        (None, name)
    };
    let Some(&(_, left, right)) = SIDED_BASES.iter().find(|(sided, _, _)| *sided == base) else {
        return Ok(None);
    };
    match side {
        Some(true) => Ok(Some(left)),
        Some(false) => Ok(Some(right)),
        None => Err(LoadError::MissingSidePrefix {
            name: name.to_string(),
        }),
    }
}

// ─── Classification ───────────────────────────────────────────────────────────

/// Assign humanoid slots to the graph's nodes.
///
/// Recoverable findings (duplicate guesses, missing required slots) come back
/// as issues; only a malformed bone name fails the call.
pub fn classify(graph: &mut SceneGraph, strategy: ClassifyStrategy) -> Result<Vec<ValidationIssue>> {
    let strategy = match strategy {
        ClassifyStrategy::Auto if graph.source.has_humanoid_metadata() => {
            ClassifyStrategy::Declarative
        }
        ClassifyStrategy::Auto => ClassifyStrategy::Heuristic,
        other => other,
    };
    log::debug!("classifying {:?} with {strategy:?}", graph.name);

    let mut issues = Vec::new();
    match strategy {
        ClassifyStrategy::Heuristic => {
            tag_by_name(graph, &mut issues)?;
            transfer_deform_legs(graph);
            split_legacy_spine(graph);
        }
        ClassifyStrategy::Declarative => drop_duplicate_slots(graph, &mut issues),
        _ => {}
    }

    for bone in REQUIRED_BONES {
        if graph.find_humanoid(bone).is_none() {
            issues.push(ValidationIssue::warning(
                "MISSING_REQUIRED_BONE",
                format!("required humanoid bone {bone} is not mapped"),
            ));
        }
    }

    let mapped = graph
        .nodes
        .iter()
        .filter(|node| node.humanoid_bone.is_some())
        .count();
    log::info!(
        "classified {mapped} humanoid bones, {} issues",
        issues.len()
    );
    Ok(issues)
}

fn tag_by_name(graph: &mut SceneGraph, issues: &mut Vec<ValidationIssue>) -> Result<()> {
    let mut owners: BTreeMap<HumanoidBone, String> = BTreeMap::new();
    for node in &mut graph.nodes {
        node.humanoid_bone = None;
        let Some(bone) = guess_humanoid_bone(&node.name)? else {
            continue;
        };
        if let Some(owner) = owners.get(&bone) {
            issues.push(duplicate_slot(bone, owner, &node.name));
            continue;
        }
        owners.insert(bone, node.name.clone());
        node.humanoid_bone = Some(bone);
    }
    Ok(())
}

/// Declared tags keep their first holder in arena order.
fn drop_duplicate_slots(graph: &mut SceneGraph, issues: &mut Vec<ValidationIssue>) {
    let mut owners: BTreeMap<HumanoidBone, String> = BTreeMap::new();
    for node in &mut graph.nodes {
        let Some(bone) = node.humanoid_bone else {
            continue;
        };
        if let Some(owner) = owners.get(&bone) {
            issues.push(duplicate_slot(bone, owner, &node.name));
            node.humanoid_bone = None;
            continue;
        }
        owners.insert(bone, node.name.clone());
    }
}

fn duplicate_slot(bone: HumanoidBone, owner: &str, ignored: &str) -> ValidationIssue {
    ValidationIssue::warning(
        "DUPLICATE_HUMANOID_BONE",
        format!("{bone} already mapped to {owner:?}; ignoring {ignored:?}"),
    )
}

/// When the full set of deform leg bones exists, they carry the leg slots
/// and the plain leg bones lose theirs.
fn transfer_deform_legs(graph: &mut SceneGraph) {
    let deform: Vec<(NodeId, HumanoidBone)> = DEFORM_LEGS
        .iter()
        .filter_map(|&(name, bone)| graph.find_by_name(name).map(|id| (id, bone)))
        .collect();
    if deform.len() != DEFORM_LEGS.len() {
        return;
    }
    for (id, bone) in deform {
        if let Some(plain) = graph.find_humanoid(bone) {
            graph.node_mut(plain).humanoid_bone = None;
        }
        graph.node_mut(id).humanoid_bone = Some(bone);
    }
    log::debug!("moved leg slots onto deform bones");
}

/// Older rigs hang spine and hips side by side. Put spine under hips and
/// move hips between the upper legs without disturbing anything else.
fn split_legacy_spine(graph: &mut SceneGraph) {
    let (Some(hips), Some(spine)) = (graph.find_humanoid(Hips), graph.find_humanoid(Spine)) else {
        return;
    };
    if graph.is_descendant(spine, hips) || graph.is_descendant(hips, spine) {
        return;
    }

    update_world_positions(graph);
    graph.detach(spine);
    graph.attach(hips, spine);
    if let (Some(left), Some(right)) = (
        graph.find_humanoid(LeftUpperLeg),
        graph.find_humanoid(RightUpperLeg),
    ) {
        let midpoint = (graph.node(left).world_position + graph.node(right).world_position) * 0.5;
        graph.node_mut(hips).world_position = midpoint;
    }
    local_from_world(graph);
    log::debug!("reparented spine under hips");
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::scene::{Mesh, Node, Skin, SourceFormat, Vertex, VertexWeights};

    fn graph_with(names: &[(&str, Option<usize>)]) -> SceneGraph {
        let mut graph = SceneGraph::new("rig", SourceFormat::Pmx);
        for (name, _) in names {
            graph.add_node(Node::new(*name));
        }
        for (index, (_, parent)) in names.iter().enumerate() {
            if let Some(parent) = parent {
                graph.attach(NodeId(*parent), NodeId(index));
            }
        }
        graph.collect_roots();
        graph
    }

    #[test]
    fn given_sided_arm_name_when_guessing_then_left_upper_arm() {
        assert_eq!(guess_humanoid_bone("左腕").unwrap(), Some(LeftUpperArm));
        assert_eq!(guess_humanoid_bone("右腕").unwrap(), Some(RightUpperArm));
        assert_eq!(guess_humanoid_bone("右小指１").unwrap(), Some(RightLittleProximal));
        assert_eq!(guess_humanoid_bone("上半身2").unwrap(), Some(Chest));
    }

    #[test]
    fn given_ik_marker_when_guessing_then_no_slot() {
        assert_eq!(guess_humanoid_bone("左足ＩＫ").unwrap(), None);
        assert_eq!(guess_humanoid_bone("右足ik").unwrap(), None);
        assert_eq!(guess_humanoid_bone("左腕ｉk").unwrap(), None);
    }

    #[test]
    fn given_excluded_names_when_guessing_then_no_slot() {
        assert_eq!(guess_humanoid_bone("全ての親").unwrap(), None);
        assert_eq!(guess_humanoid_bone("左足先EX").unwrap(), None);
        assert_eq!(guess_humanoid_bone("センター").unwrap(), None);
        assert_eq!(guess_humanoid_bone("前髪").unwrap(), None);
        assert_eq!(guess_humanoid_bone("unknown").unwrap(), None);
        // thumbs fall under 親; つま先 survives 先
        assert_eq!(guess_humanoid_bone("左親指０").unwrap(), None);
        assert_eq!(guess_humanoid_bone("右親指２").unwrap(), None);
        assert_eq!(guess_humanoid_bone("左つま先").unwrap(), Some(LeftToes));
    }

    #[test]
    fn given_sided_base_without_prefix_when_guessing_then_missing_side_prefix() {
        let result = guess_humanoid_bone("ひじ");

        assert!(matches!(result, Err(LoadError::MissingSidePrefix { name }) if name == "ひじ"));
    }

    #[test]
    fn given_deform_leg_bones_when_classifying_then_deform_bones_take_leg_slots() {
        let mut graph = graph_with(&[
            ("下半身", None),
            ("左足", Some(0)),
            ("左ひざ", Some(1)),
            ("左足首", Some(2)),
            ("左つま先", Some(3)),
            ("右足", Some(0)),
            ("右ひざ", Some(5)),
            ("右足首", Some(6)),
            ("右つま先", Some(7)),
            ("左足D", Some(0)),
            ("左ひざD", Some(9)),
            ("左足首D", Some(10)),
            ("左足先EX", Some(11)),
            ("右足D", Some(0)),
            ("右ひざD", Some(13)),
            ("右足首D", Some(14)),
            ("右足先EX", Some(15)),
        ]);
        graph.meshes.push(Mesh {
            name: "mesh".into(),
            vertices: vec![Vertex::default(); 8],
            skinning: (0..8).map(VertexWeights::single).collect(),
            ..Mesh::default()
        });
        let holder = graph.add_node(Node::new("__mesh__"));
        graph.node_mut(holder).mesh = Some(0);
        graph.node_mut(holder).skin = Some(Skin {
            joints: (9..17).map(NodeId).collect(),
        });
        graph.collect_roots();
        graph.count_weighted_vertices().unwrap();

        classify(&mut graph, ClassifyStrategy::Auto).unwrap();

        assert_eq!(graph.find_humanoid(LeftUpperLeg), Some(NodeId(9)));
        assert_eq!(graph.find_humanoid(LeftToes), Some(NodeId(12)));
        assert_eq!(graph.find_humanoid(RightFoot), Some(NodeId(15)));
        for plain in 1..9 {
            assert_eq!(graph.node(NodeId(plain)).humanoid_bone, None);
        }

        let summary = crate::prune::prune(&mut graph).unwrap();

        assert_eq!(summary.removed.len(), 8);
        assert!(summary.removed.contains(&"左足".to_string()));
        assert!(graph.find_by_name("右つま先").is_none());
        assert_eq!(graph.find_humanoid(LeftUpperLeg), graph.find_by_name("左足D"));
    }

    #[test]
    fn given_incomplete_deform_set_when_classifying_then_plain_bones_keep_slots() {
        let mut graph = graph_with(&[("下半身", None), ("左足", Some(0)), ("左足D", Some(0))]);

        classify(&mut graph, ClassifyStrategy::Heuristic).unwrap();

        assert_eq!(graph.find_humanoid(LeftUpperLeg), Some(NodeId(1)));
        assert_eq!(graph.node(NodeId(2)).humanoid_bone, None);
    }

    #[test]
    fn given_sibling_spine_and_hips_when_classifying_then_spine_moves_under_hips() {
        let mut graph = graph_with(&[
            ("センター", None),
            ("下半身", Some(0)),
            ("上半身", Some(0)),
            ("左足", Some(1)),
            ("右足", Some(1)),
        ]);
        graph.node_mut(NodeId(0)).translation = Vector3::new(0.0, 8.0, 0.0);
        graph.node_mut(NodeId(1)).translation = Vector3::new(0.0, 4.0, 0.0);
        graph.node_mut(NodeId(2)).translation = Vector3::new(0.0, 6.0, 0.0);
        graph.node_mut(NodeId(3)).translation = Vector3::new(1.0, -2.0, 0.0);
        graph.node_mut(NodeId(4)).translation = Vector3::new(-1.0, -2.0, 0.0);

        classify(&mut graph, ClassifyStrategy::Heuristic).unwrap();
        update_world_positions(&mut graph);

        assert_eq!(graph.node(NodeId(2)).parent, Some(NodeId(1)));
        assert!(graph.node(NodeId(0)).children.iter().all(|&child| child != NodeId(2)));
        assert!((graph.node(NodeId(1)).world_position - Vector3::new(0.0, 10.0, 0.0)).norm() < 1e-5);
        assert!((graph.node(NodeId(2)).world_position - Vector3::new(0.0, 14.0, 0.0)).norm() < 1e-5);
        assert!((graph.node(NodeId(3)).world_position - Vector3::new(1.0, 10.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn given_duplicate_names_when_classifying_then_first_wins_with_warning() {
        let mut graph = graph_with(&[("頭", None), ("頭", Some(0))]);

        let issues = classify(&mut graph, ClassifyStrategy::Heuristic).unwrap();

        assert_eq!(graph.find_humanoid(Head), Some(NodeId(0)));
        assert_eq!(graph.node(NodeId(1)).humanoid_bone, None);
        assert!(issues.iter().any(|issue| issue.code == "DUPLICATE_HUMANOID_BONE"));
    }

    #[test]
    fn given_declared_slot_on_two_nodes_when_classifying_declarative_then_later_tag_is_dropped() {
        let mut graph = graph_with(&[("hips_a", None), ("hips_b", Some(0))]);
        graph.node_mut(NodeId(0)).humanoid_bone = Some(Hips);
        graph.node_mut(NodeId(1)).humanoid_bone = Some(Hips);

        let issues = classify(&mut graph, ClassifyStrategy::Declarative).unwrap();

        assert_eq!(graph.find_humanoid(Hips), Some(NodeId(0)));
        assert_eq!(graph.node(NodeId(1)).humanoid_bone, None);
        let duplicates = issues
            .iter()
            .filter(|issue| issue.code == "DUPLICATE_HUMANOID_BONE")
            .count();
        assert_eq!(duplicates, 1);
    }

    #[test]
    fn given_vrm_source_when_classifying_auto_then_tags_are_kept_and_missing_bones_warned() {
        let mut graph = graph_with(&[("J_Bip_C_Hips", None), ("左腕", Some(0))]);
        graph.source = SourceFormat::Vrm0;
        graph.node_mut(NodeId(0)).humanoid_bone = Some(Hips);

        let issues = classify(&mut graph, ClassifyStrategy::Auto).unwrap();

        assert_eq!(graph.find_humanoid(Hips), Some(NodeId(0)));
        assert_eq!(graph.node(NodeId(1)).humanoid_bone, None);
        let missing = issues
            .iter()
            .filter(|issue| issue.code == "MISSING_REQUIRED_BONE")
            .count();
        assert_eq!(missing, REQUIRED_BONES.len() - 1);
    }
}
