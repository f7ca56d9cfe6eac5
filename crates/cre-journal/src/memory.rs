use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use cre_types::PendingWrite;

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use crate::record::JournalRecord;

/// In-memory journal backend for tests and embedding.
///
/// `fail_next(n)` makes the next `n` durable writes (appends or rewrites)
/// fail, simulating a full disk or revoked storage permission.
#[derive(Default)]
pub struct MemoryJournal {
    records: RwLock<Vec<JournalRecord>>,
    failures: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with records, as if loaded from disk.
    pub fn with_records(records: Vec<JournalRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Snapshot of the durable records.
    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.read().expect("lock poisoned").clone()
    }

    /// Writes that reached durable state so far.
    pub fn durable_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> JournalResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(JournalError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl JournalBackend for MemoryJournal {
    fn load(&self) -> JournalResult<Vec<JournalRecord>> {
        Ok(self.records())
    }

    fn append(&self, record: &JournalRecord) -> JournalResult<()> {
        self.check_failure()?;
        self.records.write().expect("lock poisoned").push(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rewrite(&self, pending: &[PendingWrite]) -> JournalResult<()> {
        self.check_failure()?;
        *self.records.write().expect("lock poisoned") =
            pending.iter().cloned().map(JournalRecord::Append).collect();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJournal")
            .field("records", &self.records.read().map(|r| r.len()).unwrap_or(0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_failures_are_consumed() {
        let j = MemoryJournal::new();
        j.fail_next(2);
        let rec = JournalRecord::Append(PendingWrite::delete("p1"));
        assert!(j.append(&rec).is_err());
        assert!(j.rewrite(&[]).is_err());
        assert!(j.append(&rec).is_ok());
        assert_eq!(j.records().len(), 1);
        assert_eq!(j.durable_writes(), 1);
    }
}
