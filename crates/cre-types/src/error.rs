use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// A caller-supplied draft is structurally invalid.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("invalid local id: {0}")]
    InvalidLocalId(String),
}

impl TypeError {
    pub(crate) fn blank(field: &'static str) -> Self {
        Self::Validation {
            field,
            reason: "must not be blank".into(),
        }
    }
}
