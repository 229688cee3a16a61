//! Whole-state JSON snapshot of the projection.
//!
//! The snapshot is a single JSON array of records stored under the
//! well-known key [`SNAPSHOT_KEY`]. It is rewritten after every successful
//! mutation whatever the session backend is, and doubles as that backend
//! ([`SnapshotBackend`]) when LMDB cannot be opened.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};

use crate::app_response::AppResponse;
use crate::backend::{BackendKind, RecordBackend};
use crate::species_record::{normalize_family, RecordId, SpeciesRecord};
use crate::sync_queue::{SyncEntry, SyncOperation};

pub const SNAPSHOT_KEY: &str = "species_records";

#[derive(Debug, Clone)]
pub struct FlatSnapshot {
    path: PathBuf,
}

impl FlatSnapshot {
    pub fn in_dir(base_dir: &Path) -> Self {
        Self {
            path: base_dir.join(format!("{SNAPSHOT_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing snapshot reads as empty.
    pub fn load_all(&self) -> Result<Vec<SpeciesRecord>, AppResponse> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes through a temp file and renames it over the snapshot.
    pub fn save_all(&self, records: &[SpeciesRecord]) -> Result<(), AppResponse> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Snapshot mirrored: {} records", records.len());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AppResponse> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Session backend used after the durable store failed to open.
///
/// Ids continue from the highest id found in the snapshot. The sync queue
/// lives in memory only and does not outlive the session.
pub struct SnapshotBackend {
    snapshot: FlatSnapshot,
    records: Vec<SpeciesRecord>,
    queue: Vec<SyncEntry>,
    next_id: RecordId,
    next_seq: u64,
}

impl SnapshotBackend {
    pub fn open(snapshot: FlatSnapshot) -> Result<Self, AppResponse> {
        let mut records = snapshot.load_all()?;
        let mut next_id = records.iter().filter_map(|r| r.id).max().unwrap_or(0) + 1;
        // Legacy entries may predate ids; they are written back with the next mirror.
        for record in records.iter_mut().filter(|r| r.id.is_none()) {
            record.id = Some(next_id);
            next_id += 1;
        }
        info!("Snapshot backend ready with {} records", records.len());
        Ok(Self {
            snapshot,
            records,
            queue: Vec::new(),
            next_id,
            next_seq: 1,
        })
    }

    fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id == Some(id))
    }
}

impl RecordBackend for SnapshotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Snapshot
    }

    fn load_all(&self) -> Result<Vec<SpeciesRecord>, AppResponse> {
        Ok(self.records.clone())
    }

    fn persist(&mut self, mut record: SpeciesRecord) -> Result<SpeciesRecord, AppResponse> {
        record.validate().map_err(AppResponse::ValidationError)?;

        let id = match record.id {
            Some(id) => id,
            None => self.next_id,
        };
        self.next_id = self.next_id.max(id + 1);
        record.id = Some(id);

        let mut next = self.records.clone();
        match self.position(id) {
            Some(at) => {
                let previous = &next[at];
                if record.created_at.is_none() {
                    record.created_at = previous.created_at;
                }
                if record.registered_on.is_empty() {
                    record.registered_on = previous.registered_on.clone();
                }
                record.stamp_for_persist(Utc::now());
                next[at] = record.clone();
            }
            None => {
                record.stamp_for_persist(Utc::now());
                next.push(record.clone());
            }
        }

        self.snapshot.save_all(&next)?;
        self.records = next;
        Ok(record)
    }

    fn next_id(&self) -> Result<RecordId, AppResponse> {
        Ok(self.next_id)
    }

    fn delete(&mut self, id: RecordId) -> Result<bool, AppResponse> {
        let Some(at) = self.position(id) else {
            return Ok(false);
        };
        let mut next = self.records.clone();
        next.remove(at);
        self.snapshot.save_all(&next)?;
        self.records = next;
        Ok(true)
    }

    fn replace_all(&mut self, records: &[SpeciesRecord]) -> Result<(), AppResponse> {
        let mut next = records.to_vec();
        for record in next.iter_mut() {
            record.family = normalize_family(&record.family);
            if record.id.is_none() {
                record.id = Some(self.next_id);
                self.next_id += 1;
            }
        }
        if let Some(highest) = next.iter().filter_map(|r| r.id).max() {
            self.next_id = self.next_id.max(highest + 1);
        }
        self.snapshot.save_all(&next)?;
        self.records = next;
        Ok(())
    }

    fn mark_synced(&mut self, ids: &[RecordId]) -> Result<(), AppResponse> {
        let mut next = self.records.clone();
        for record in next.iter_mut() {
            if record.id.is_some_and(|id| ids.contains(&id)) {
                record.synced = true;
            }
        }
        self.snapshot.save_all(&next)?;
        self.records = next;
        Ok(())
    }

    fn enqueue(&mut self, operation: SyncOperation) -> Result<SyncEntry, AppResponse> {
        let entry = operation.into_entry(self.next_seq);
        self.next_seq += 1;
        self.queue.push(entry.clone());
        Ok(entry)
    }

    fn pending(&self) -> Result<Vec<SyncEntry>, AppResponse> {
        Ok(self.queue.clone())
    }

    fn acknowledge(&mut self, through: u64) -> Result<usize, AppResponse> {
        let before = self.queue.len();
        self.queue.retain(|entry| entry.seq > through);
        Ok(before - self.queue.len())
    }
}
