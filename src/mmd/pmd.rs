use binrw::BinRead;
use log::debug;

use super::text::decode_cp932;
use crate::error::Result;
use crate::reader::ByteReader;

/// Parent/tail sentinel meaning "no bone".
pub const NO_BONE: u16 = 0xFFFF;

#[derive(Debug, Clone, BinRead)]
pub struct PmdVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub bones: [u16; 2],
    /// Weight of `bones[0]` in percent (0..=100).
    pub weight: u8,
    pub edge_flag: u8,
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdMaterial {
    pub diffuse: [f32; 3],
    pub alpha: f32,
    pub specularity: f32,
    pub specular: [f32; 3],
    pub ambient: [f32; 3],
    pub toon_index: i8,
    pub edge_flag: u8,
    pub index_count: u32,
    #[br(map = |raw: [u8; 20]| decode_cp932(&raw))]
    pub texture_file: String,
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdBone {
    #[br(map = |raw: [u8; 20]| decode_cp932(&raw))]
    pub name: String,
    pub parent: u16,
    pub tail: u16,
    pub kind: u8,
    pub ik_parent: u16,
    pub position: [f32; 3],
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdIk {
    pub target: u16,
    pub effector: u16,
    chain_length: u8,
    pub iterations: u16,
    pub weight: f32,
    #[br(count = chain_length)]
    pub chain: Vec<u16>,
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdMorphOffset {
    pub index: u32,
    pub offset: [f32; 3],
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdMorph {
    #[br(map = |raw: [u8; 20]| decode_cp932(&raw))]
    pub name: String,
    offset_count: u32,
    pub kind: u8,
    #[br(count = offset_count)]
    pub offsets: Vec<PmdMorphOffset>,
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdBoneDisplay {
    pub bone: u16,
    pub group: u8,
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdRigidBody {
    #[br(map = |raw: [u8; 20]| decode_cp932(&raw))]
    pub name: String,
    pub bone: u16,
    pub group: u8,
    pub no_collision_mask: u16,
    pub shape: u8,
    pub size: [f32; 3],
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: u8,
}

#[derive(Debug, Clone, BinRead)]
pub struct PmdJoint {
    #[br(map = |raw: [u8; 20]| decode_cp932(&raw))]
    pub name: String,
    pub rigid_bodies: [u32; 2],
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub translation_min: [f32; 3],
    pub translation_max: [f32; 3],
    pub rotation_min: [f32; 3],
    pub rotation_max: [f32; 3],
    pub spring_translation: [f32; 3],
    pub spring_rotation: [f32; 3],
}

#[derive(Debug, Clone, BinRead)]
struct Cp932Name20(#[br(map = |raw: [u8; 20]| decode_cp932(&raw))] String);

#[derive(Debug, Clone, BinRead)]
struct Cp932Name50(#[br(map = |raw: [u8; 50]| decode_cp932(&raw))] String);

#[derive(Debug, Clone, BinRead)]
struct Cp932Name100(#[br(map = |raw: [u8; 100]| decode_cp932(&raw))] String);

#[derive(Debug, Clone, BinRead)]
struct Cp932Comment(#[br(map = |raw: [u8; 256]| decode_cp932(&raw))] String);

/// English names from the optional extension section.
#[derive(Debug, Clone, Default)]
pub struct PmdEnglish {
    pub name: String,
    pub comment: String,
    pub bone_names: Vec<String>,
    pub morph_names: Vec<String>,
    pub bone_group_names: Vec<String>,
}

/// A fully decoded PMD file. Trailing sections missing from older files are
/// left empty.
#[derive(Debug, Clone)]
pub struct PmdModel {
    pub version: f32,
    pub name: String,
    pub comment: String,
    pub vertices: Vec<PmdVertex>,
    pub indices: Vec<u16>,
    pub materials: Vec<PmdMaterial>,
    pub bones: Vec<PmdBone>,
    pub iks: Vec<PmdIk>,
    pub morphs: Vec<PmdMorph>,
    pub morph_display: Vec<u16>,
    pub bone_group_names: Vec<String>,
    pub bone_display: Vec<PmdBoneDisplay>,
    pub english: Option<PmdEnglish>,
    pub toon_textures: Vec<String>,
    pub rigid_bodies: Vec<PmdRigidBody>,
    pub joints: Vec<PmdJoint>,
}

const VERTEX_SIZE: usize = 38;
const MATERIAL_SIZE: usize = 70;
const BONE_SIZE: usize = 39;
const MIN_IK_SIZE: usize = 11;
const MIN_MORPH_SIZE: usize = 25;
const RIGID_BODY_SIZE: usize = 83;
const JOINT_SIZE: usize = 124;
const TOON_TEXTURE_COUNT: usize = 10;

/// Decodes a PMD file.
pub fn decode(data: &[u8]) -> Result<PmdModel> {
    let mut reader = ByteReader::new(data);
    reader.expect_magic(b"Pmd", "PMD")?;
    let version: f32 = reader.read()?;
    let Cp932Name20(name) = reader.read()?;
    let Cp932Comment(comment) = reader.read()?;
    debug!("PMD {version}: {name}");

    let count = read_u32_count(&mut reader, "vertex", VERTEX_SIZE)?;
    let vertices = reader.read_table::<PmdVertex>(count)?;

    let count = read_u32_count(&mut reader, "index", 2)?;
    let indices = reader.read_table::<u16>(count)?;

    let count = read_u32_count(&mut reader, "material", MATERIAL_SIZE)?;
    let materials = reader.read_table::<PmdMaterial>(count)?;

    let count = read_u16_count(&mut reader, "bone", BONE_SIZE)?;
    let bones = reader.read_table::<PmdBone>(count)?;

    let count = read_u16_count(&mut reader, "ik", MIN_IK_SIZE)?;
    let iks = reader.read_table::<PmdIk>(count)?;

    let count = read_u16_count(&mut reader, "morph", MIN_MORPH_SIZE)?;
    let morphs = reader.read_table::<PmdMorph>(count)?;

    let count = read_u8_count(&mut reader, "morph display", 2)?;
    let morph_display = reader.read_table::<u16>(count)?;

    let count = read_u8_count(&mut reader, "bone group", 50)?;
    let bone_group_names = reader
        .read_table::<Cp932Name50>(count)?
        .into_iter()
        .map(|Cp932Name50(name)| name)
        .collect::<Vec<_>>();

    let count = read_u32_count(&mut reader, "bone display", 3)?;
    let bone_display = reader.read_table::<PmdBoneDisplay>(count)?;

    let mut model = PmdModel {
        version,
        name,
        comment,
        vertices,
        indices,
        materials,
        bones,
        iks,
        morphs,
        morph_display,
        bone_group_names,
        bone_display,
        english: None,
        toon_textures: Vec::new(),
        rigid_bodies: Vec::new(),
        joints: Vec::new(),
    };

    // Everything below is optional: PMD 1.0 files may stop at any section boundary.
    if reader.is_end() {
        debug!("PMD ends before english section");
        return Ok(model);
    }
    let has_english: u8 = reader.read()?;
    if has_english != 0 {
        model.english = Some(read_english(&mut reader, &model)?);
    }

    if reader.is_end() {
        debug!("PMD ends before toon texture section");
        return Ok(model);
    }
    model.toon_textures = reader
        .read_table::<Cp932Name100>(TOON_TEXTURE_COUNT)?
        .into_iter()
        .map(|Cp932Name100(name)| name)
        .collect();

    if reader.is_end() {
        debug!("PMD ends before rigid body section");
        return Ok(model);
    }
    let count = read_u32_count(&mut reader, "rigid body", RIGID_BODY_SIZE)?;
    model.rigid_bodies = reader.read_table::<PmdRigidBody>(count)?;

    if reader.is_end() {
        debug!("PMD ends before joint section");
        return Ok(model);
    }
    let count = read_u32_count(&mut reader, "joint", JOINT_SIZE)?;
    model.joints = reader.read_table::<PmdJoint>(count)?;

    Ok(model)
}

fn read_english(reader: &mut ByteReader<'_>, model: &PmdModel) -> Result<PmdEnglish> {
    let Cp932Name20(name) = reader.read()?;
    let Cp932Comment(comment) = reader.read()?;
    let bone_names = read_names20(reader, model.bones.len())?;
    // The base morph has no english name.
    let morph_count = model.morphs.iter().filter(|morph| morph.name != "base").count();
    let morph_names = read_names20(reader, morph_count)?;
    let bone_group_names = reader
        .read_table::<Cp932Name50>(model.bone_group_names.len())?
        .into_iter()
        .map(|Cp932Name50(name)| name)
        .collect();

    Ok(PmdEnglish {
        name,
        comment,
        bone_names,
        morph_names,
        bone_group_names,
    })
}

fn read_names20(reader: &mut ByteReader<'_>, count: usize) -> Result<Vec<String>> {
    Ok(reader
        .read_table::<Cp932Name20>(count)?
        .into_iter()
        .map(|Cp932Name20(name)| name)
        .collect())
}

fn read_u32_count(reader: &mut ByteReader<'_>, table: &str, record_size: usize) -> Result<usize> {
    let offset = reader.position();
    let count: u32 = reader.read()?;
    reader.check_count(table, offset, count as usize, record_size)
}

fn read_u16_count(reader: &mut ByteReader<'_>, table: &str, record_size: usize) -> Result<usize> {
    let offset = reader.position();
    let count: u16 = reader.read()?;
    reader.check_count(table, offset, usize::from(count), record_size)
}

fn read_u8_count(reader: &mut ByteReader<'_>, table: &str, record_size: usize) -> Result<usize> {
    let offset = reader.position();
    let count: u8 = reader.read()?;
    reader.check_count(table, offset, usize::from(count), record_size)
}
