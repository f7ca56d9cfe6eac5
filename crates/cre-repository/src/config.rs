use std::path::Path;

use serde::{Deserialize, Serialize};

use cre_image::ResolverConfig;
use cre_journal::JournalConfig;
use cre_types::UserId;
use cre_votes::VoteMode;

use crate::error::{RepoError, RepoResult};

/// Behaviour of a [`PostRepository`](crate::PostRepository).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// The session user. Namespaces the journal and the caches.
    pub user_id: UserId,
    /// Replay the journal during every refresh.
    pub replay_on_refresh: bool,
    /// Content of a contest entry submitted through the engine.
    pub entry_marker: String,
    pub vote_mode: VoteMode,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            user_id: "anonymous".into(),
            replay_on_refresh: true,
            entry_marker: "[contest-entry]".into(),
            vote_mode: VoteMode::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Everything the engine needs, as loaded from a TOML file:
///
/// ```toml
/// [resolver]
/// base_url = "https://example.org"
///
/// [journal]
/// dir = "/var/lib/cre"
///
/// [repository]
/// user_id = "42"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub journal: JournalConfig,
    pub repository: RepositoryConfig,
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> RepoResult<Self> {
        toml::from_str(text).map_err(|e| RepoError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> RepoResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> RepoResult<String> {
        toml::to_string_pretty(self).map_err(|e| RepoError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let c = EngineConfig::from_toml(
            r#"
            [resolver]
            base_url = "https://host"

            [repository]
            user_id = "u7"
            vote_mode = "refuse-if-voted"
            "#,
        )
        .unwrap();
        assert_eq!(c.resolver.base_url, "https://host");
        assert_eq!(c.resolver.upload_dir, "uploads");
        assert_eq!(c.repository.user_id, "u7");
        assert_eq!(c.repository.vote_mode, VoteMode::RefuseIfVoted);
        assert!(c.repository.replay_on_refresh);
        assert_eq!(c.journal, JournalConfig::default());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut c = EngineConfig::default();
        c.repository.user_id = "u1".into();
        let text = c.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), c);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(EngineConfig::from_toml("[resolver"), Err(RepoError::Config(_))));
    }
}
