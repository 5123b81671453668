//! glTF 2.0 JSON types from the `gltf` crate, plus the small lookups the
//! loader needs on top of them.
//!
//! Vendor extensions such as `VRM` and `VRMC_vrm` are kept as raw JSON on
//! [`super::GltfDocument`] and queried with JSON pointers.

pub use ::gltf::json::accessor::{ComponentType, GenericComponentType, Type};
pub use ::gltf::json::buffer::{Stride, View as BufferView};
pub use ::gltf::json::image::MimeType;
pub use ::gltf::json::material::{PbrBaseColorFactor, PbrMetallicRoughness};
pub use ::gltf::json::mesh::{Mode, Primitive, Semantic};
pub use ::gltf::json::texture::Info as TextureInfo;
pub use ::gltf::json::scene::UnitQuaternion;
pub use ::gltf::json::validation::{Checked, USize64};
pub use ::gltf::json::{
    Accessor, Asset, Buffer, Image, Index, Material, Mesh, Node, Root, Scene, Skin, Texture,
};

/// Accessor index of a primitive attribute.
pub fn attribute(primitive: &Primitive, semantic: Semantic) -> Option<usize> {
    primitive
        .attributes
        .get(&Checked::Valid(semantic))
        .map(|index| index.value())
}

/// A glTF size or offset as a host index. Values beyond the address space
/// saturate and then fail the bounds checks that follow.
pub fn to_usize(value: USize64) -> usize {
    usize::try_from(value.0).unwrap_or(usize::MAX)
}

pub fn to_usize64(value: usize) -> USize64 {
    USize64(value as u64)
}

/// Typed handle from a position in one of the root arrays.
pub fn index<T>(value: usize) -> Index<T> {
    Index::new(u32::try_from(value).unwrap_or(u32::MAX))
}
