//! One-way promotion of legacy snapshot data into the durable store.

use std::collections::HashSet;

use chrono::Utc;
use log::{info, warn};

use crate::app_response::AppResponse;
use crate::backend::RecordBackend;
use crate::flat_snapshot::FlatSnapshot;
use crate::species_record::SpeciesRecord;
use crate::sync_queue::SyncOperation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing in the snapshot.
    NothingToMigrate,
    /// The durable store already held data; the snapshot was left alone.
    StoreNotEmpty,
    Migrated { records: usize },
    /// The durable write failed. The snapshot is untouched and serves the
    /// session; the next startup tries again.
    Deferred { reason: String },
}

/// Moves snapshot records into an empty durable store.
///
/// `loaded` is what the durable store returned at startup; on success it is
/// replaced by the stored records. All records go in through a single
/// [`RecordBackend::replace_all`], so the store ends up holding either the
/// whole snapshot or nothing. An error leaves the snapshot in place.
pub fn migrate_snapshot(
    backend: &mut dyn RecordBackend,
    snapshot: &FlatSnapshot,
    loaded: &mut Vec<SpeciesRecord>,
) -> Result<MigrationOutcome, AppResponse> {
    let mut legacy = snapshot.load_all()?;
    if legacy.is_empty() {
        return Ok(MigrationOutcome::NothingToMigrate);
    }
    if !loaded.is_empty() {
        return Ok(MigrationOutcome::StoreNotEmpty);
    }

    info!("Migrating {} snapshot records into the durable store", legacy.len());
    let now = Utc::now();
    let mut seen = HashSet::new();
    for record in legacy.iter_mut() {
        // A repeated id would overwrite an earlier record; give it a fresh one.
        if let Some(id) = record.id {
            if !seen.insert(id) {
                warn!("Snapshot repeats id {id}, assigning a new one");
                record.id = None;
            }
        }
        record.stamp_for_persist(now);
    }

    backend.replace_all(&legacy)?;
    let migrated = backend.load_all()?;
    for record in &migrated {
        if let Err(e) = backend.enqueue(SyncOperation::saved(record, true)) {
            warn!("Could not queue migrated record {:?}: {e}", record.id);
        }
    }

    if let Err(e) = snapshot.clear() {
        warn!("Migrated snapshot could not be cleared, it is ignored from now on: {e}");
    }
    info!("Migration complete: {} records", migrated.len());
    let records = migrated.len();
    *loaded = migrated;
    Ok(MigrationOutcome::Migrated { records })
}
