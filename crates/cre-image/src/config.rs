use serde::{Deserialize, Serialize};

/// Configuration for [`ImageResolver`](crate::ImageResolver).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Absolute base URL every relative reference is rewritten against.
    pub base_url: String,
    /// Directory (relative to `base_url`) where uploaded files are served.
    pub upload_dir: String,
    /// Path fragments that mark a storage-relative path. When one occurs,
    /// only the trailing filename is kept.
    pub storage_markers: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".into(),
            upload_dir: "uploads".into(),
            storage_markers: vec!["uploads/".into()],
        }
    }
}

impl ResolverConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}
