use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Flush/sync strategy for journal writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    #[default]
    EveryWrite,
    /// Flush to the OS page cache only.
    OsDefault,
}

/// Configuration for the local fallback store and caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding `<namespace>.journal` files and cache folders.
    pub dir: PathBuf,
    pub sync_mode: SyncMode,
    /// First delay before retrying a failed durable write.
    pub retry_initial_ms: u64,
    /// Upper bound for the exponential retry delay.
    pub retry_max_ms: u64,
    /// Retries before the background task gives up. The next write retries
    /// again regardless.
    pub max_retries: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cre"),
            sync_mode: SyncMode::default(),
            retry_initial_ms: 200,
            retry_max_ms: 10_000,
            max_retries: 8,
        }
    }
}

impl JournalConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let ms = self.retry_initial_ms.saturating_mul(factor).min(self.retry_max_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = JournalConfig::default();
        assert_eq!(c.sync_mode, SyncMode::EveryWrite);
        assert_eq!(c.max_retries, 8);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let c = JournalConfig {
            retry_initial_ms: 100,
            retry_max_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(c.retry_delay(0), Duration::from_millis(100));
        assert_eq!(c.retry_delay(1), Duration::from_millis(200));
        assert_eq!(c.retry_delay(3), Duration::from_millis(800));
        assert_eq!(c.retry_delay(4), Duration::from_millis(1_000));
        assert_eq!(c.retry_delay(60), Duration::from_millis(1_000));
    }
}
