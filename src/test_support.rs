//! Byte-level builders for PMX, PMD and glTF test inputs.

use std::borrow::Cow;

use encoding_rs::SHIFT_JIS;
use serde_json::Value;

use crate::gltf::GltfDocument;
use crate::gltf::accessor::AccessorWriter;
use crate::gltf::schema::{self, Checked, Index, Mode, Primitive, Root, Semantic};

// ─── Little-endian writer ─────────────────────────────────────────────────────

#[derive(Default)]
struct Bytes(Vec<u8>);

impl Bytes {
    fn u8(&mut self, value: u8) -> &mut Self {
        self.0.push(value);
        self
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u32(&mut self, value: u32) -> &mut Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn i32(&mut self, value: i32) -> &mut Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn f32s(&mut self, values: &[f32]) -> &mut Self {
        for value in values {
            self.0.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    /// NUL-padded CP932 field of exactly `width` bytes.
    fn cp932(&mut self, text: &str, width: usize) -> &mut Self {
        let (encoded, _, _) = SHIFT_JIS.encode(text);
        let mut field = encoded.into_owned();
        field.resize(width, 0);
        self.raw(&field)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

// ─── PMX ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum PmxWeights {
    Bdef1(usize),
    Bdef2(usize, usize, f32),
    Bdef4([usize; 4], [f32; 4]),
}

#[derive(Debug, Clone)]
pub struct PmxBoneSpec {
    name: String,
    parent: Option<usize>,
    position: [f32; 3],
    ik: Option<(usize, Vec<usize>)>,
}

impl PmxBoneSpec {
    pub fn new(name: &str, parent: Option<usize>, position: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            parent,
            position,
            ik: None,
        }
    }

    pub fn with_ik(mut self, target: usize, links: &[usize]) -> Self {
        self.ik = Some((target, links.to_vec()));
        self
    }
}

/// Offsets of interesting tables inside a built PMX file.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    /// Offset of the index count.
    pub index_table: usize,
    /// Offset of the bone count.
    pub bone_table: usize,
}

#[derive(Debug, Clone)]
pub struct PmxFixture {
    utf8: bool,
    vertex_width: u8,
    bone_width: u8,
    deform_tag: Option<u8>,
    physics: bool,
    bones: Vec<PmxBoneSpec>,
    vertices: Vec<([f32; 3], PmxWeights)>,
    indices: Vec<u32>,
    textures: Vec<String>,
    material_texture: Option<usize>,
}

impl PmxFixture {
    pub fn new() -> Self {
        Self {
            utf8: false,
            vertex_width: 1,
            bone_width: 1,
            deform_tag: None,
            physics: false,
            bones: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            textures: Vec::new(),
            material_texture: None,
        }
    }

    pub fn bone(mut self, bone: PmxBoneSpec) -> Self {
        self.bones.push(bone);
        self
    }

    pub fn vertex(mut self, position: [f32; 3], weights: PmxWeights) -> Self {
        self.vertices.push((position, weights));
        self
    }

    pub fn triangle(mut self, indices: [u32; 3]) -> Self {
        self.indices.extend_from_slice(&indices);
        self
    }

    /// Adds a texture path and binds it to the single material.
    pub fn texture(mut self, path: &str) -> Self {
        self.textures.push(path.to_string());
        self.material_texture = Some(self.textures.len() - 1);
        self
    }

    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    pub fn bone_index_width(mut self, width: u8) -> Self {
        self.bone_width = width;
        self
    }

    pub fn vertex_index_width(mut self, width: u8) -> Self {
        self.vertex_width = width;
        self
    }

    /// Writes `tag` as every vertex's deform type, with no payload.
    pub fn raw_deform_tag(mut self, tag: u8) -> Self {
        self.deform_tag = Some(tag);
        self
    }

    /// Appends one rigid body on bone 1 and one joint with a missing second body.
    pub fn with_physics(mut self) -> Self {
        self.physics = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(self) -> (Vec<u8>, Layout) {
        let mut out = Bytes::default();
        out.raw(b"PMX ").f32s(&[2.0]);
        out.u8(8)
            .u8(if self.utf8 { 1 } else { 0 })
            .u8(0)
            .u8(self.vertex_width)
            .u8(1)
            .u8(1)
            .u8(self.bone_width)
            .u8(1)
            .u8(1);
        for text in ["fixture", "", "", ""] {
            self.text(&mut out, text);
        }

        out.i32(self.vertices.len() as i32);
        for (position, weights) in &self.vertices {
            out.f32s(position).f32s(&[0.0, 1.0, 0.0]).f32s(&[0.0, 0.0]);
            match (self.deform_tag, weights) {
                (Some(tag), _) => {
                    out.u8(tag);
                }
                (None, PmxWeights::Bdef1(bone)) => {
                    out.u8(0);
                    self.index(&mut out, self.bone_width, Some(*bone));
                }
                (None, PmxWeights::Bdef2(first, second, weight)) => {
                    out.u8(1);
                    self.index(&mut out, self.bone_width, Some(*first));
                    self.index(&mut out, self.bone_width, Some(*second));
                    out.f32s(&[*weight]);
                }
                (None, PmxWeights::Bdef4(bones, weights)) => {
                    out.u8(2);
                    for bone in bones {
                        self.index(&mut out, self.bone_width, Some(*bone));
                    }
                    out.f32s(weights);
                }
            }
            out.f32s(&[1.0]);
        }

        let index_table = out.len();
        out.i32(self.indices.len() as i32);
        for &index in &self.indices {
            match self.vertex_width {
                1 => out.u8(index as u8),
                2 => out.u16(index as u16),
                _ => out.u32(index),
            };
        }

        out.i32(self.textures.len() as i32);
        for path in &self.textures {
            self.text(&mut out, path);
        }

        out.i32(1);
        self.text(&mut out, "material");
        self.text(&mut out, "");
        out.f32s(&[1.0, 1.0, 1.0, 1.0])
            .f32s(&[0.0; 3])
            .f32s(&[5.0])
            .f32s(&[0.5; 3])
            .u8(0)
            .f32s(&[0.0, 0.0, 0.0, 1.0])
            .f32s(&[1.0]);
        self.index(&mut out, 1, self.material_texture);
        self.index(&mut out, 1, None);
        out.u8(0).u8(1).u8(0);
        self.text(&mut out, "");
        out.i32(self.indices.len() as i32);

        let bone_table = out.len();
        out.i32(self.bones.len() as i32);
        for bone in &self.bones {
            self.text(&mut out, &bone.name);
            self.text(&mut out, "");
            out.f32s(&bone.position);
            self.index(&mut out, self.bone_width, bone.parent);
            out.i32(0);
            // rotatable | visible | enabled, plus ik
            let flags: u16 = if bone.ik.is_some() { 0x1A | 0x20 } else { 0x1A };
            out.u16(flags).f32s(&[0.0; 3]);
            if let Some((target, links)) = &bone.ik {
                self.index(&mut out, self.bone_width, Some(*target));
                out.i32(40).f32s(&[1.0]).i32(links.len() as i32);
                for &link in links {
                    self.index(&mut out, self.bone_width, Some(link));
                    out.u8(0);
                }
            }
        }

        // morphs, display frames
        out.i32(0).i32(0);

        if self.physics {
            out.i32(1);
            self.text(&mut out, "body");
            self.text(&mut out, "");
            self.index(&mut out, self.bone_width, Some(1));
            out.u8(0)
                .u16(0xFFFF)
                .u8(0)
                .f32s(&[1.0; 3])
                .f32s(&[0.0; 3])
                .f32s(&[0.0; 3])
                .f32s(&[1.0, 0.5, 0.5, 0.0, 0.5])
                .u8(0);

            out.i32(1);
            self.text(&mut out, "joint");
            self.text(&mut out, "");
            out.u8(0);
            self.index(&mut out, 1, Some(0));
            self.index(&mut out, 1, None);
            out.f32s(&[0.0; 24]);
        }

        (out.0, Layout { index_table, bone_table })
    }

    fn text(&self, out: &mut Bytes, text: &str) {
        let bytes: Vec<u8> = if self.utf8 {
            text.as_bytes().to_vec()
        } else {
            text.encode_utf16().flat_map(u16::to_le_bytes).collect()
        };
        out.i32(bytes.len() as i32).raw(&bytes);
    }

    /// Signed index of the given width; `None` is written as -1.
    fn index(&self, out: &mut Bytes, width: u8, value: Option<usize>) {
        let value = value.map_or(-1, |value| value as i64);
        match width {
            1 => out.raw(&(value as i8).to_le_bytes()),
            2 => out.raw(&(value as i16).to_le_bytes()),
            _ => out.i32(value as i32),
        };
    }
}

// ─── PMD ──────────────────────────────────────────────────────────────────────

const PMD_NO_BONE: u16 = 0xFFFF;
const PMD_ENGLISH_BONE_NAMES: [&str; 2] = ["center", "arm_L"];

#[derive(Debug, Clone, Default)]
pub struct PmdFixture {
    bones: Vec<(String, Option<usize>, [f32; 3])>,
    vertices: Vec<([f32; 3], [u16; 2], u8)>,
    indices: Vec<u16>,
    texture: String,
    extensions: bool,
}

impl PmdFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bone(mut self, name: &str, parent: Option<usize>, position: [f32; 3]) -> Self {
        self.bones.push((name.to_string(), parent, position));
        self
    }

    pub fn vertex(mut self, position: [f32; 3], bones: [u16; 2], weight: u8) -> Self {
        self.vertices.push((position, bones, weight));
        self
    }

    pub fn triangle(mut self, indices: [u16; 3]) -> Self {
        self.indices.extend_from_slice(&indices);
        self
    }

    /// Sets the texture file of the single material.
    pub fn texture(mut self, file: &str) -> Self {
        self.texture = file.to_string();
        self
    }

    /// Appends the english, toon texture, rigid body and joint sections.
    pub fn with_extensions(mut self) -> Self {
        self.extensions = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Bytes::default();
        out.raw(b"Pmd").f32s(&[1.0]);
        out.cp932("fixture", 20).cp932("", 256);

        out.u32(self.vertices.len() as u32);
        for (position, bones, weight) in &self.vertices {
            out.f32s(position)
                .f32s(&[0.0, 1.0, 0.0])
                .f32s(&[0.0, 0.0])
                .u16(bones[0])
                .u16(bones[1])
                .u8(*weight)
                .u8(0);
        }

        out.u32(self.indices.len() as u32);
        for &index in &self.indices {
            out.u16(index);
        }

        out.u32(1);
        out.f32s(&[0.8, 0.8, 0.8])
            .f32s(&[1.0])
            .f32s(&[5.0])
            .f32s(&[0.0; 3])
            .f32s(&[0.5; 3])
            .u8(0xFF)
            .u8(1)
            .u32(self.indices.len() as u32)
            .cp932(&self.texture, 20);

        out.u16(self.bones.len() as u16);
        for (name, parent, position) in &self.bones {
            let parent = parent.map_or(PMD_NO_BONE, |parent| parent as u16);
            out.cp932(name, 20)
                .u16(parent)
                .u16(PMD_NO_BONE)
                .u8(0)
                .u16(0)
                .f32s(position);
        }

        // iks, morphs, morph display, bone groups, bone display
        out.u16(0).u16(0).u8(0).u8(0).u32(0);

        if self.extensions {
            out.u8(1).cp932("fixture", 20).cp932("", 256);
            for index in 0..self.bones.len() {
                let name = PMD_ENGLISH_BONE_NAMES
                    .get(index)
                    .map_or_else(|| format!("bone{index}"), |name| name.to_string());
                out.cp932(&name, 20);
            }
            for index in 1..=10 {
                out.cp932(&format!("toon{index:02}.bmp"), 100);
            }

            out.u32(1);
            out.cp932("body", 20)
                .u16(0)
                .u8(0)
                .u16(0xFFFF)
                .u8(0)
                .f32s(&[1.0; 3])
                .f32s(&[0.0; 3])
                .f32s(&[0.0; 3])
                .f32s(&[1.0, 0.5, 0.5, 0.0, 0.5])
                .u8(0);

            out.u32(1);
            out.cp932("joint", 20).u32(0).u32(0).f32s(&[0.0; 24]);
        }

        out.0
    }
}

// ─── glTF ─────────────────────────────────────────────────────────────────────

const GLB_JSON_CHUNK: u32 = 0x4E4F_534A;
const GLB_BIN_CHUNK: u32 = 0x004E_4942;

/// A glTF document under construction. Accessor data accumulates in
/// `writer` until the document is finished.
#[derive(Debug, Default)]
pub struct GltfFixture {
    pub root: Root,
    pub extensions: Option<Value>,
    pub writer: AccessorWriter,
}

fn mesh(name: &str, primitive: Primitive) -> schema::Mesh {
    schema::Mesh {
        name: Some(name.into()),
        primitives: vec![primitive],
        weights: None,
        extensions: None,
        extras: Default::default(),
    }
}

impl GltfFixture {
    /// `root` -> `body`, where `body` draws one indexed triangle.
    pub fn triangle() -> Self {
        let mut fixture = Self::default();
        fixture.root.asset.version = "2.0".into();
        let primitive = fixture.primitive(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            Some(&[0u16, 1, 2][..]),
        );
        fixture.root.meshes.push(mesh("body", primitive));
        fixture.root.nodes.push(schema::Node {
            name: Some("root".into()),
            children: Some(vec![Index::new(1)]),
            ..schema::Node::default()
        });
        fixture.root.nodes.push(schema::Node {
            name: Some("body".into()),
            mesh: Some(Index::new(0)),
            ..schema::Node::default()
        });
        fixture.root.scenes.push(schema::Scene {
            name: None,
            nodes: vec![Index::new(0)],
            extensions: None,
            extras: Default::default(),
        });
        fixture.root.scene = Some(Index::new(0));
        fixture
    }

    /// `Hips` -> [`Spine`, `body`], with `body` skinned to both bones.
    pub fn skinned_triangle() -> Self {
        let mut fixture = Self::default();
        fixture.root.asset.version = "2.0".into();
        let mut primitive = fixture.primitive(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            Some(&[0u16, 1, 2][..]),
        );
        let joints = fixture
            .writer
            .push_array(&[[0u8, 0, 0, 0], [1, 0, 0, 0], [0, 1, 0, 0]], false);
        let weights = fixture.writer.push_array(
            &[
                [1.0f32, 0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
                [0.5, 0.5, 0.0, 0.0],
            ],
            false,
        );
        primitive
            .attributes
            .insert(Checked::Valid(Semantic::Joints(0)), schema::index(joints));
        primitive
            .attributes
            .insert(Checked::Valid(Semantic::Weights(0)), schema::index(weights));
        fixture.root.meshes.push(mesh("body", primitive));
        fixture.root.nodes.push(schema::Node {
            name: Some("Hips".into()),
            children: Some(vec![Index::new(1), Index::new(2)]),
            ..schema::Node::default()
        });
        fixture.root.nodes.push(schema::Node {
            name: Some("Spine".into()),
            translation: Some([0.0, 0.5, 0.0]),
            ..schema::Node::default()
        });
        fixture.root.nodes.push(schema::Node {
            name: Some("body".into()),
            mesh: Some(Index::new(0)),
            skin: Some(Index::new(0)),
            ..schema::Node::default()
        });
        fixture.root.skins.push(schema::Skin {
            name: None,
            joints: vec![Index::new(0), Index::new(1)],
            inverse_bind_matrices: None,
            skeleton: None,
            extensions: None,
            extras: Default::default(),
        });
        fixture
    }

    /// Writes positions (and optional u16 indices) and returns a primitive
    /// that references them.
    pub fn primitive(&mut self, positions: &[[f32; 3]], indices: Option<&[u16]>) -> Primitive {
        let position = self.writer.push_array(positions, true);
        let indices = indices.map(|indices| schema::index(self.writer.push_array(indices, false)));
        Primitive {
            attributes: [(Checked::Valid(Semantic::Positions), schema::index(position))].into(),
            indices,
            material: None,
            mode: Checked::Valid(Mode::Triangles),
            targets: None,
            extensions: None,
            extras: Default::default(),
        }
    }

    /// Adds image 0 (PNG signature bytes in a buffer view, no mime type) and
    /// texture 0 sourcing it.
    pub fn embed_png_texture(&mut self) {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let view = self.writer.push_bytes(png);
        self.root.images.push(schema::Image {
            buffer_view: Some(schema::index(view)),
            mime_type: None,
            name: None,
            uri: None,
            extensions: None,
            extras: Default::default(),
        });
        self.root.textures.push(schema::Texture {
            name: Some("base".into()),
            sampler: None,
            source: schema::index(self.root.images.len() - 1),
            extensions: None,
            extras: Default::default(),
        });
    }

    pub fn extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn into_document(self) -> GltfDocument<'static> {
        let Self {
            mut root,
            extensions,
            writer,
        } = self;
        let bin = writer.finish(&mut root);
        GltfDocument {
            root,
            extensions,
            bin: Some(Cow::Owned(bin)),
        }
    }

    /// Serializes to a GLB container with a JSON chunk and a BIN chunk.
    pub fn build_glb(self) -> Vec<u8> {
        let Self {
            mut root,
            extensions,
            writer,
        } = self;
        let mut bin = writer.finish(&mut root);
        let mut document = serde_json::to_value(&root).unwrap_or_default();
        if let (Some(extensions), Some(object)) = (extensions, document.as_object_mut()) {
            object.insert("extensions".into(), extensions);
        }
        let mut json = serde_json::to_vec(&document).unwrap_or_default();
        json.resize(json.len().next_multiple_of(4), b' ');
        bin.resize(bin.len().next_multiple_of(4), 0);

        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut out = Bytes::default();
        out.raw(b"glTF").u32(2).u32(total as u32);
        out.u32(json.len() as u32).u32(GLB_JSON_CHUNK).raw(&json);
        out.u32(bin.len() as u32).u32(GLB_BIN_CHUNK).raw(&bin);
        out.0
    }
}
