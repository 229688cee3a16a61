//! The storage seam between [`crate::RecordCore`] and its two backends.
//!
//! Startup tries the durable store once and boxes whichever implementation
//! it settles on; nothing after that point checks which one it got.

use crate::app_response::AppResponse;
use crate::species_record::{RecordId, SpeciesRecord};
use crate::sync_queue::{SyncEntry, SyncOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// LMDB environment on disk.
    Durable,
    /// Whole-state JSON snapshot, used when LMDB could not be opened.
    Snapshot,
}

pub trait RecordBackend {
    fn kind(&self) -> BackendKind;

    fn load_all(&self) -> Result<Vec<SpeciesRecord>, AppResponse>;

    /// Inserts when `record.id` is `None`, replaces otherwise.
    ///
    /// Implementations stamp the record (see
    /// [`SpeciesRecord::stamp_for_persist`]) and return it with its id set.
    fn persist(&mut self, record: SpeciesRecord) -> Result<SpeciesRecord, AppResponse>;

    /// The id the next insert without an explicit id would receive.
    fn next_id(&self) -> Result<RecordId, AppResponse>;

    /// Returns `false` when no record had that id.
    fn delete(&mut self, id: RecordId) -> Result<bool, AppResponse>;

    /// Drops every stored record and writes `records` with their ids intact.
    ///
    /// Families are normalized on the way in. Callers reject repeated ids
    /// beforehand.
    fn replace_all(&mut self, records: &[SpeciesRecord]) -> Result<(), AppResponse>;

    /// Flags records as confirmed by the remote without re-stamping them.
    fn mark_synced(&mut self, ids: &[RecordId]) -> Result<(), AppResponse>;

    fn enqueue(&mut self, operation: SyncOperation) -> Result<SyncEntry, AppResponse>;

    /// Pending entries in queue order.
    fn pending(&self) -> Result<Vec<SyncEntry>, AppResponse>;

    /// Removes every entry with `seq <= through` and returns how many went.
    fn acknowledge(&mut self, through: u64) -> Result<usize, AppResponse>;
}
