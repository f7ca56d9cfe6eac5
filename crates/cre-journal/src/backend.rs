use cre_types::PendingWrite;

use crate::error::JournalResult;
use crate::record::JournalRecord;

/// Durable storage for one journal namespace.
///
/// Implementations must satisfy:
/// - `load` returns every intact record in the order it was appended.
///   Torn or corrupted records are skipped, never reported as errors.
/// - `append` is durable (per the configured sync mode) when it returns `Ok`.
/// - `rewrite` atomically replaces the whole journal with the given writes.
pub trait JournalBackend: Send + Sync + 'static {
    fn load(&self) -> JournalResult<Vec<JournalRecord>>;

    fn append(&self, record: &JournalRecord) -> JournalResult<()>;

    fn rewrite(&self, pending: &[PendingWrite]) -> JournalResult<()>;
}
