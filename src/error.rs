use thiserror::Error;

/// Failure raised while decoding, building or normalizing a character asset.
///
/// Every stage propagates these immediately; no stage recovers on its own.
/// Callers that want a fallback (PMX then PMD, for instance) retry explicitly.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The input does not start with a recognized signature.
    #[error("format error: {0}")]
    Format(String),

    /// The input has a valid signature but a truncated or malformed section.
    #[error("parse error at byte {offset}: {message}")]
    Parse { offset: u64, message: String },

    /// A glTF accessor declares a component type or shape other than the one requested.
    #[error("type mismatch for accessor {accessor}: expected {expected}, found {found}")]
    TypeMismatch {
        accessor: usize,
        expected: String,
        found: String,
    },

    /// The input uses a feature this loader deliberately does not handle.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Internal consistency check failed after a structural edit.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A left/right bone name lacks the side prefix the classifier requires.
    #[error("bone name {name:?} matches a sided humanoid bone but has no left/right prefix")]
    MissingSidePrefix { name: String },
}

impl LoadError {
    /// Parse error for structural problems that are not tied to a stream offset.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Parse {
            offset: 0,
            message: message.into(),
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;
