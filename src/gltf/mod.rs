//! glTF 2.0 container detection, schema and binary accessors.

pub mod accessor;
pub mod schema;

use std::borrow::Cow;

use ::gltf::binary::Glb;
use log::debug;
use serde_json::Value;

use crate::error::{LoadError, Result};

pub const GLB_MAGIC: &[u8; 4] = b"glTF";

/// A parsed glTF document plus its embedded binary chunk, if any.
#[derive(Debug, Clone)]
pub struct GltfDocument<'a> {
    pub root: schema::Root,
    /// The top-level `extensions` object, untyped.
    pub extensions: Option<Value>,
    pub bin: Option<Cow<'a, [u8]>>,
}

impl GltfDocument<'_> {
    /// Looks up a vendor extension member, e.g. `/VRM/humanoid/humanBones`.
    pub fn extension(&self, pointer: &str) -> Option<&Value> {
        self.extensions.as_ref()?.pointer(pointer)
    }

    pub fn bin(&self) -> Option<&[u8]> {
        self.bin.as_deref()
    }

    pub fn accessors(&self) -> accessor::AccessorReader<'_> {
        accessor::AccessorReader::new(&self.root, self.bin())
    }
}

pub fn is_glb(data: &[u8]) -> bool {
    data.starts_with(GLB_MAGIC)
}

/// Plain glTF: a JSON object, optionally behind a UTF-8 BOM or whitespace.
pub fn is_json(data: &[u8]) -> bool {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    data.iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'{')
}

/// Parses GLB or plain JSON glTF.
pub fn parse(data: &[u8]) -> Result<GltfDocument<'_>> {
    if is_glb(data) {
        let glb = Glb::from_slice(data)
            .map_err(|err| LoadError::Format(format!("invalid GLB container: {err}")))?;
        debug!(
            "GLB container: json {} bytes, bin {} bytes",
            glb.json.len(),
            glb.bin.as_ref().map_or(0, |bin| bin.len())
        );
        let (root, extensions) = parse_json(&glb.json)?;
        return Ok(GltfDocument {
            root,
            extensions,
            bin: glb.bin,
        });
    }
    if is_json(data) {
        let (root, extensions) = parse_json(data)?;
        return Ok(GltfDocument {
            root,
            extensions,
            bin: None,
        });
    }
    Err(LoadError::Format(
        "neither a GLB container nor glTF JSON".to_string(),
    ))
}

fn parse_json(bytes: &[u8]) -> Result<(schema::Root, Option<Value>)> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut value: Value = serde_json::from_slice(bytes).map_err(|err| {
        LoadError::malformed(format!(
            "invalid glTF JSON at line {}, column {}: {err}",
            err.line(),
            err.column()
        ))
    })?;
    let extensions = value
        .as_object_mut()
        .and_then(|object| object.remove("extensions"));
    let root = serde_json::from_value(value)
        .map_err(|err| LoadError::malformed(format!("invalid glTF document: {err}")))?;
    Ok((root, extensions))
}
