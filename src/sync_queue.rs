//! Pending-mutation log entries.
//!
//! Entries are appended on every successful create, update or delete and
//! are only ever removed by a successful reconciliation pass, which
//! acknowledges the whole batch it delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::species_record::{RecordId, SpeciesRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Body of a delete entry: the identity alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemovedRecord {
    pub id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncPayload {
    // Tried first: a full record never matches the id-only shape.
    Removed(RemovedRecord),
    Record(SpeciesRecord),
}

impl SyncPayload {
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            SyncPayload::Record(record) => record.id,
            SyncPayload::Removed(removed) => Some(removed.id),
        }
    }
}

/// A mutation waiting to be queued; the backend assigns `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOperation {
    pub kind: OperationKind,
    pub payload: SyncPayload,
    pub queued_at: DateTime<Utc>,
}

impl SyncOperation {
    /// `Create` when the record had no id before this persist.
    pub fn saved(record: &SpeciesRecord, was_new: bool) -> Self {
        Self {
            kind: if was_new { OperationKind::Create } else { OperationKind::Update },
            payload: SyncPayload::Record(record.clone()),
            queued_at: Utc::now(),
        }
    }

    pub fn deleted(id: RecordId) -> Self {
        Self {
            kind: OperationKind::Delete,
            payload: SyncPayload::Removed(RemovedRecord { id }),
            queued_at: Utc::now(),
        }
    }

    pub fn into_entry(self, seq: u64) -> SyncEntry {
        SyncEntry {
            seq,
            kind: self.kind,
            payload: self.payload,
            queued_at: self.queued_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(rename = "data")]
    pub payload: SyncPayload,
    #[serde(rename = "timestamp")]
    pub queued_at: DateTime<Utc>,
}

/// Ids of records a delivered batch confirmed as still present remotely.
///
/// A record deleted later in the same batch is left out.
pub fn confirmed_record_ids(batch: &[SyncEntry]) -> Vec<RecordId> {
    let mut confirmed: Vec<RecordId> = Vec::new();
    for entry in batch {
        let Some(id) = entry.payload.record_id() else {
            continue;
        };
        match entry.kind {
            OperationKind::Create | OperationKind::Update => {
                if !confirmed.contains(&id) {
                    confirmed.push(id);
                }
            }
            OperationKind::Delete => confirmed.retain(|kept| *kept != id),
        }
    }
    confirmed
}
