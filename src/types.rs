use serde::{Deserialize, Serialize};

use crate::scene::SourceFormat;

// ─── Issue reporting ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A recoverable finding surfaced to the caller instead of failing the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

// ─── Load report ──────────────────────────────────────────────────────────────

/// Summary of one [`crate::pipeline::load_model`] run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub model_name: String,
    pub source: SourceFormat,
    pub node_count_before_prune: usize,
    pub node_count: usize,
    pub removed_nodes: Vec<String>,
    pub mesh_count: usize,
    pub total_vertices: usize,
    pub total_polygons: usize,
    /// `(slot, node name)` pairs in slot order.
    pub mapped_bones: Vec<(String, String)>,
    pub missing_required_bones: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}
