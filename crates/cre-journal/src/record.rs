use serde::{Deserialize, Serialize};

use cre_types::{LocalId, PendingWrite};

/// A single entry of the durable journal.
///
/// The journal is append-only: confirmation is a tombstone record, and the
/// log is compacted by rewriting only the writes still pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    Append(PendingWrite),
    Confirm(LocalId),
}

impl JournalRecord {
    /// Fold a record sequence into the writes still pending, in append order.
    pub fn replay(records: impl IntoIterator<Item = JournalRecord>) -> Vec<PendingWrite> {
        let mut pending: Vec<PendingWrite> = Vec::new();
        for record in records {
            match record {
                Self::Append(write) => {
                    if !pending.iter().any(|w| w.local_id == write.local_id) {
                        pending.push(write);
                    }
                }
                Self::Confirm(id) => pending.retain(|w| w.local_id != id),
            }
        }
        pending
    }
}
