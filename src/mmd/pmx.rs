use std::io::{Read, Seek};

use binrw::{BinRead, BinResult, Endian};
use log::debug;
use modular_bitfield::prelude::*;

use super::text::{PmxText, TextEncoding};
use crate::error::{LoadError, Result};
use crate::reader::ByteReader;

// ─── Header ───────────────────────────────────────────────────────────────────

/// Byte width of one index kind, declared per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
pub enum IndexWidth {
    #[br(magic = 1u8)]
    One,
    #[br(magic = 2u8)]
    Two,
    #[br(magic = 4u8)]
    Four,
}

impl IndexWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }
}

/// The six independently sized index spaces of a PMX file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Vertex,
    Texture,
    Material,
    Bone,
    Morph,
    RigidBody,
}

/// The 8 configuration bytes following the PMX version.
#[derive(Debug, Clone, Copy, BinRead)]
pub struct PmxConfig {
    #[br(assert(flag_length == 8, "PMX config length must be 8, found {}", flag_length))]
    pub flag_length: u8,
    pub encoding: TextEncoding,
    #[br(assert(extended_uv <= 4, "extended uv count {} out of range", extended_uv))]
    pub extended_uv: u8,
    pub vertex_index: IndexWidth,
    pub texture_index: IndexWidth,
    pub material_index: IndexWidth,
    pub bone_index: IndexWidth,
    pub morph_index: IndexWidth,
    pub rigid_body_index: IndexWidth,
}

impl PmxConfig {
    pub fn width(&self, kind: IndexKind) -> IndexWidth {
        match kind {
            IndexKind::Vertex => self.vertex_index,
            IndexKind::Texture => self.texture_index,
            IndexKind::Material => self.material_index,
            IndexKind::Bone => self.bone_index,
            IndexKind::Morph => self.morph_index,
            IndexKind::RigidBody => self.rigid_body_index,
        }
    }
}

// ─── Index reader ─────────────────────────────────────────────────────────────

/// Any index stored in a PMX file. `None` is the `-1` "no reference" value.
///
/// All index fields go through this reader. Vertex indices are unsigned at
/// widths 1 and 2; every other kind is signed, where `-1` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmxIndex(pub Option<usize>);

impl BinRead for PmxIndex {
    type Args<'a> = (PmxConfig, IndexKind);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        (config, kind): Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let raw = match (config.width(kind), kind) {
            (IndexWidth::One, IndexKind::Vertex) => i64::from(u8::read_options(reader, endian, ())?),
            (IndexWidth::Two, IndexKind::Vertex) => {
                i64::from(u16::read_options(reader, endian, ())?)
            }
            (IndexWidth::One, _) => i64::from(i8::read_options(reader, endian, ())?),
            (IndexWidth::Two, _) => i64::from(i16::read_options(reader, endian, ())?),
            (IndexWidth::Four, _) => i64::from(i32::read_options(reader, endian, ())?),
        };
        match raw {
            -1 if kind != IndexKind::Vertex => Ok(Self(None)),
            raw if raw >= 0 => Ok(Self(Some(raw as usize))),
            raw => Err(binrw::Error::AssertFail {
                pos,
                message: format!("invalid {kind:?} index {raw}"),
            }),
        }
    }
}

impl PmxIndex {
    pub fn get(self) -> Option<usize> {
        self.0
    }
}

// ─── Vertices ─────────────────────────────────────────────────────────────────

/// Skinning payload of one vertex, selected by its leading type byte.
#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub enum Deform {
    #[br(magic = 0u8)]
    Bdef1 {
        #[br(args(config, IndexKind::Bone))]
        bone: PmxIndex,
    },
    #[br(magic = 1u8)]
    Bdef2 {
        #[br(args(config, IndexKind::Bone))]
        bones: [PmxIndex; 2],
        weight: f32,
    },
    #[br(magic = 2u8)]
    Bdef4 {
        #[br(args(config, IndexKind::Bone))]
        bones: [PmxIndex; 4],
        weights: [f32; 4],
    },
    #[br(magic = 3u8)]
    Sdef {
        #[br(args(config, IndexKind::Bone))]
        bones: [PmxIndex; 2],
        weight: f32,
        c: [f32; 3],
        r0: [f32; 3],
        r1: [f32; 3],
    },
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct PmxVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// Additional UV channels; decoded to stay aligned, never surfaced.
    #[br(count = usize::from(config.extended_uv))]
    pub extended_uv: Vec<[f32; 4]>,
    #[br(args(config))]
    pub deform: Deform,
    pub edge_scale: f32,
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[bitfield]
#[derive(Debug, Clone, BinRead)]
#[br(map = Self::from_bytes)]
pub struct DrawingFlags {
    pub double_sided: bool,
    pub ground_shadow: bool,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub edge: bool,
    #[skip]
    __: B3,
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub enum ToonReference {
    #[br(magic = 0u8)]
    Texture(#[br(args(config, IndexKind::Texture))] PmxIndex),
    #[br(magic = 1u8)]
    Shared(u8),
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct PmxMaterial {
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub name: String,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub english_name: String,
    pub diffuse: [f32; 4],
    pub specular: [f32; 3],
    pub specularity: f32,
    pub ambient: [f32; 3],
    pub drawing_flags: DrawingFlags,
    pub edge_color: [f32; 4],
    pub edge_size: f32,
    #[br(args(config, IndexKind::Texture))]
    pub texture: PmxIndex,
    #[br(args(config, IndexKind::Texture))]
    pub sphere_texture: PmxIndex,
    pub sphere_mode: u8,
    #[br(args(config))]
    pub toon: ToonReference,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub comment: String,
    #[br(assert(index_count >= 0 && index_count % 3 == 0, "bad material index count {}", index_count))]
    pub index_count: i32,
}

// ─── Bones ────────────────────────────────────────────────────────────────────

#[bitfield]
#[derive(Debug, Clone, BinRead)]
#[br(map = Self::from_bytes)]
pub struct BoneFlags {
    pub tail_is_bone: bool,
    pub rotatable: bool,
    pub translatable: bool,
    pub visible: bool,
    pub enabled: bool,
    pub ik: bool,
    #[skip]
    __: B2,
    pub inherit_rotation: bool,
    pub inherit_translation: bool,
    pub fixed_axis: bool,
    pub local_axes: bool,
    pub physics_after_deform: bool,
    pub external_parent: bool,
    #[skip]
    __: B2,
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig, indexed: bool))]
pub enum BoneTail {
    #[br(pre_assert(!indexed))]
    Offset([f32; 3]),
    #[br(pre_assert(indexed))]
    Bone(#[br(args(config, IndexKind::Bone))] PmxIndex),
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct BoneInherit {
    #[br(args(config, IndexKind::Bone))]
    pub parent: PmxIndex,
    pub factor: f32,
}

#[derive(Debug, Clone, BinRead)]
pub enum IkLimit {
    #[br(magic = 0u8)]
    Free,
    #[br(magic = 1u8)]
    Limited { min: [f32; 3], max: [f32; 3] },
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct IkLink {
    #[br(args(config, IndexKind::Bone))]
    pub bone: PmxIndex,
    pub limit: IkLimit,
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct BoneIk {
    #[br(args(config, IndexKind::Bone))]
    pub target: PmxIndex,
    pub loop_count: i32,
    pub limit_angle: f32,
    #[br(assert(link_count >= 0, "negative IK link count {}", link_count))]
    link_count: i32,
    #[br(args { count: link_count as usize, inner: (config,) })]
    pub links: Vec<IkLink>,
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct PmxBone {
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub name: String,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub english_name: String,
    pub position: [f32; 3],
    #[br(args(config, IndexKind::Bone))]
    pub parent: PmxIndex,
    pub layer: i32,
    pub flags: BoneFlags,
    #[br(args(config, flags.tail_is_bone()))]
    pub tail: BoneTail,
    #[br(if(flags.inherit_rotation() || flags.inherit_translation()), args(config))]
    pub inherit: Option<BoneInherit>,
    #[br(if(flags.fixed_axis()))]
    pub fixed_axis: Option<[f32; 3]>,
    #[br(if(flags.local_axes()))]
    pub local_axes: Option<[[f32; 3]; 2]>,
    #[br(if(flags.external_parent()))]
    pub external_key: Option<i32>,
    #[br(if(flags.ik()), args(config))]
    pub ik: Option<BoneIk>,
}

// ─── Morphs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
pub enum MorphKind {
    #[br(magic = 0u8)]
    Group,
    #[br(magic = 1u8)]
    Vertex,
    #[br(magic = 2u8)]
    Bone,
    #[br(magic = 3u8)]
    Uv,
    #[br(magic = 4u8)]
    UvExt1,
    #[br(magic = 5u8)]
    UvExt2,
    #[br(magic = 6u8)]
    UvExt3,
    #[br(magic = 7u8)]
    UvExt4,
    #[br(magic = 8u8)]
    Material,
    #[br(magic = 9u8)]
    Flip,
    #[br(magic = 10u8)]
    Impulse,
}

impl MorphKind {
    fn is_uv(self) -> bool {
        matches!(
            self,
            Self::Uv | Self::UvExt1 | Self::UvExt2 | Self::UvExt3 | Self::UvExt4
        )
    }
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig, kind: MorphKind))]
pub enum MorphOffset {
    #[br(pre_assert(kind == MorphKind::Group))]
    Group {
        #[br(args(config, IndexKind::Morph))]
        morph: PmxIndex,
        weight: f32,
    },
    #[br(pre_assert(kind == MorphKind::Vertex))]
    Vertex {
        #[br(args(config, IndexKind::Vertex))]
        vertex: PmxIndex,
        offset: [f32; 3],
    },
    #[br(pre_assert(kind == MorphKind::Bone))]
    Bone {
        #[br(args(config, IndexKind::Bone))]
        bone: PmxIndex,
        translation: [f32; 3],
        rotation: [f32; 4],
    },
    #[br(pre_assert(kind.is_uv()))]
    Uv {
        #[br(args(config, IndexKind::Vertex))]
        vertex: PmxIndex,
        offset: [f32; 4],
    },
    #[br(pre_assert(kind == MorphKind::Material))]
    Material {
        #[br(args(config, IndexKind::Material))]
        material: PmxIndex,
        operation: u8,
        diffuse: [f32; 4],
        specular: [f32; 3],
        specularity: f32,
        ambient: [f32; 3],
        edge_color: [f32; 4],
        edge_size: f32,
        texture_tint: [f32; 4],
        sphere_tint: [f32; 4],
        toon_tint: [f32; 4],
    },
    #[br(pre_assert(kind == MorphKind::Flip))]
    Flip {
        #[br(args(config, IndexKind::Morph))]
        morph: PmxIndex,
        weight: f32,
    },
    #[br(pre_assert(kind == MorphKind::Impulse))]
    Impulse {
        #[br(args(config, IndexKind::RigidBody))]
        rigid_body: PmxIndex,
        local: u8,
        velocity: [f32; 3],
        torque: [f32; 3],
    },
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct PmxMorph {
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub name: String,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub english_name: String,
    pub panel: u8,
    pub kind: MorphKind,
    #[br(assert(offset_count >= 0, "negative morph offset count {}", offset_count))]
    offset_count: i32,
    #[br(args { count: offset_count as usize, inner: (config, kind) })]
    pub offsets: Vec<MorphOffset>,
}

// ─── Display frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub enum DisplayItem {
    #[br(magic = 0u8)]
    Bone(#[br(args(config, IndexKind::Bone))] PmxIndex),
    #[br(magic = 1u8)]
    Morph(#[br(args(config, IndexKind::Morph))] PmxIndex),
}

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct PmxDisplayFrame {
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub name: String,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub english_name: String,
    pub special: u8,
    #[br(assert(item_count >= 0, "negative display item count {}", item_count))]
    item_count: i32,
    #[br(args { count: item_count as usize, inner: (config,) })]
    pub items: Vec<DisplayItem>,
}

// ─── Physics ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, BinRead)]
#[br(import(config: PmxConfig))]
pub struct PmxRigidBody {
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub name: String,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub english_name: String,
    #[br(args(config, IndexKind::Bone))]
    pub bone: PmxIndex,
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
#[br(import(config: PmxConfig))]
pub struct PmxJoint {
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub name: String,
    #[br(try_map = |text: PmxText| text.decode(config.encoding))]
    pub english_name: String,
    pub kind: u8,
    #[br(args(config, IndexKind::RigidBody))]
    pub rigid_bodies: [PmxIndex; 2],
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub translation_min: [f32; 3],
    pub translation_max: [f32; 3],
    pub rotation_min: [f32; 3],
    pub rotation_max: [f32; 3],
    pub spring_translation: [f32; 3],
    pub spring_rotation: [f32; 3],
}

// ─── Model ────────────────────────────────────────────────────────────────────

/// A fully decoded PMX file.
#[derive(Debug, Clone)]
pub struct PmxModel {
    pub version: f32,
    pub config: PmxConfig,
    pub name: String,
    pub english_name: String,
    pub comment: String,
    pub english_comment: String,
    pub vertices: Vec<PmxVertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<String>,
    pub materials: Vec<PmxMaterial>,
    pub bones: Vec<PmxBone>,
    pub morphs: Vec<PmxMorph>,
    pub display_frames: Vec<PmxDisplayFrame>,
    pub rigid_bodies: Vec<PmxRigidBody>,
    pub joints: Vec<PmxJoint>,
}

// Smallest possible encoded size of each record, used to reject absurd counts.
const MIN_VERTEX_SIZE: usize = 32 + 1 + 1 + 4;
const MIN_MATERIAL_SIZE: usize = 86;
const MIN_BONE_SIZE: usize = 28;
const MIN_MORPH_SIZE: usize = 14;
const MIN_FRAME_SIZE: usize = 13;
const MIN_RIGID_BODY_SIZE: usize = 70;
const MIN_JOINT_SIZE: usize = 107;

/// Decodes a PMX file.
///
/// The signature is checked before anything else is read, so a wrong magic
/// is always reported as [`LoadError::Format`].
pub fn decode(data: &[u8]) -> Result<PmxModel> {
    let mut reader = ByteReader::new(data);
    reader.expect_magic(b"PMX ", "PMX")?;
    let version: f32 = reader.read()?;
    let config: PmxConfig = reader.read()?;
    debug!(
        "PMX {version}: encoding {:?}, index widths v{} t{} m{} b{} mo{} r{}",
        config.encoding,
        config.vertex_index.bytes(),
        config.texture_index.bytes(),
        config.material_index.bytes(),
        config.bone_index.bytes(),
        config.morph_index.bytes(),
        config.rigid_body_index.bytes(),
    );

    let name = read_text(&mut reader, config)?;
    let english_name = read_text(&mut reader, config)?;
    let comment = read_text(&mut reader, config)?;
    let english_comment = read_text(&mut reader, config)?;

    let count = reader.read_count("vertex", MIN_VERTEX_SIZE)?;
    let vertices = read_records::<PmxVertex>(&mut reader, config, count)?;

    let offset = reader.position();
    let count = reader.read_count("index", config.vertex_index.bytes())?;
    if count % 3 != 0 {
        return Err(LoadError::Parse {
            offset,
            message: format!("index count {count} is not a multiple of 3"),
        });
    }
    let indices = (0..count)
        .map(|_| {
            let index = reader.read_args::<PmxIndex>((config, IndexKind::Vertex))?;
            index
                .get()
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| LoadError::malformed("vertex index out of range"))
        })
        .collect::<Result<Vec<_>>>()?;

    let count = reader.read_count("texture", 4)?;
    let textures = (0..count)
        .map(|_| read_text(&mut reader, config))
        .collect::<Result<Vec<_>>>()?;

    let count = reader.read_count("material", MIN_MATERIAL_SIZE)?;
    let materials = read_records::<PmxMaterial>(&mut reader, config, count)?;

    let count = reader.read_count("bone", MIN_BONE_SIZE)?;
    let bones = read_records::<PmxBone>(&mut reader, config, count)?;

    let count = reader.read_count("morph", MIN_MORPH_SIZE)?;
    let morphs = read_records::<PmxMorph>(&mut reader, config, count)?;

    let count = reader.read_count("display frame", MIN_FRAME_SIZE)?;
    let display_frames = read_records::<PmxDisplayFrame>(&mut reader, config, count)?;

    let rigid_bodies = if reader.is_end() {
        debug!("PMX ends before rigid body section");
        Vec::new()
    } else {
        let count = reader.read_count("rigid body", MIN_RIGID_BODY_SIZE)?;
        read_records::<PmxRigidBody>(&mut reader, config, count)?
    };

    let joints = if reader.is_end() {
        debug!("PMX ends before joint section");
        Vec::new()
    } else {
        let count = reader.read_count("joint", MIN_JOINT_SIZE)?;
        read_records::<PmxJoint>(&mut reader, config, count)?
    };

    if !reader.is_end() {
        debug!("ignoring {} trailing PMX bytes", reader.remaining());
    }

    Ok(PmxModel {
        version,
        config,
        name,
        english_name,
        comment,
        english_comment,
        vertices,
        indices,
        textures,
        materials,
        bones,
        morphs,
        display_frames,
        rigid_bodies,
        joints,
    })
}

fn read_text(reader: &mut ByteReader<'_>, config: PmxConfig) -> Result<String> {
    let offset = reader.position();
    let text: PmxText = reader.read()?;
    text.decode(config.encoding).map_err(|err| LoadError::Parse {
        offset,
        message: err.to_string(),
    })
}

fn read_records<T>(reader: &mut ByteReader<'_>, config: PmxConfig, count: usize) -> Result<Vec<T>>
where
    T: for<'b> BinRead<Args<'b> = (PmxConfig,)>,
{
    (0..count).map(|_| reader.read_args::<T>((config,))).collect()
}
