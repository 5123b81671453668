use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scene::mmd::DEFAULT_MMD_SCALE;

/// How humanoid slots are assigned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyStrategy {
    /// Declarative for VRM sources, heuristic for everything else.
    #[default]
    Auto,
    /// Trust the VRM humanoid metadata verbatim.
    Declarative,
    /// Guess slots from bone names and fix up the skeleton.
    Heuristic,
    /// Leave tags exactly as the builder produced them.
    Off,
}

/// Settings for one load. Persisted as JSON by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Scene units per MMD unit, applied to PMD and PMX positions.
    pub mmd_scale: f32,
    pub classify: ClassifyStrategy,
    /// Remove bones that carry no mesh, slot or weight.
    pub prune: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mmd_scale: DEFAULT_MMD_SCALE,
            classify: ClassifyStrategy::Auto,
            prune: true,
        }
    }
}

/// Save load options to a JSON file.
pub fn save_options(path: &Path, options: &LoadOptions) -> Result<()> {
    let content =
        serde_json::to_string_pretty(options).context("failed to serialize load options as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save load options: {}", path.display()))?;
    Ok(())
}

/// Load options from a JSON file. Missing fields take their defaults.
pub fn load_options(path: &Path) -> Result<LoadOptions> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load options: {}", path.display()))?;
    let options: LoadOptions =
        serde_json::from_str(&content).context("failed to parse load options JSON")?;
    Ok(options)
}
