//! Loads glTF/VRM, PMX and PMD character models into one scene graph,
//! tags humanoid bones and strips bones that carry nothing.

pub mod error;
pub mod gltf;
pub mod humanoid;
pub mod logging;
pub mod mmd;
pub mod options;
pub mod pipeline;
pub mod prune;
pub mod reader;
pub mod scene;
pub mod transform;
pub mod types;

#[cfg(test)]
mod test_support;
