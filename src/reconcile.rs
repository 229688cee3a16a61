//! Drains the sync queue against a remote counterpart.
//!
//! Delivery is at-least-once: a batch is acknowledged only after the remote
//! accepted all of it, and a rejected batch is resent whole on the next
//! trigger. A remote that applied part of a batch before failing will see
//! those entries again.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;
use crate::backend::RecordBackend;
use crate::species_record::RecordId;
use crate::sync_queue::{confirmed_record_ids, SyncEntry};

/// Applies a batch of queued mutations remotely.
///
/// The wire protocol is the implementor's business. Returning `Ok` means
/// every entry in `batch` was accepted.
pub trait RemoteSink {
    fn apply_batch(&mut self, batch: &[SyncEntry]) -> Result<(), AppResponse>;
}

/// Accepts everything. Stands in until a real remote exists.
#[derive(Debug, Default)]
pub struct MockRemote {
    delivered: usize,
}

impl MockRemote {
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl RemoteSink for MockRemote {
    fn apply_batch(&mut self, batch: &[SyncEntry]) -> Result<(), AppResponse> {
        debug!("Mock remote accepted {} entries", batch.len());
        self.delivered += batch.len();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
    ConnectivityRegained,
    UserRequested,
    Periodic,
}

/// Indicator shown next to the connection badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Offline,
    Online,
    Syncing,
    Synced,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncReport {
    Offline,
    NothingPending,
    Drained { delivered: usize },
    Failed { reason: String, retained: usize },
}

#[derive(Debug)]
pub struct Reconciler {
    phase: SyncPhase,
    status: SyncStatus,
    last_report: Option<SyncReport>,
}

impl Reconciler {
    pub fn new(online: bool) -> Self {
        Self {
            phase: SyncPhase::Idle,
            status: if online { SyncStatus::Online } else { SyncStatus::Offline },
            last_report: None,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn last_report(&self) -> Option<&SyncReport> {
        self.last_report.as_ref()
    }

    pub fn connectivity_changed(&mut self, online: bool) {
        self.status = if online { SyncStatus::Online } else { SyncStatus::Offline };
    }

    /// Runs one pass. Never returns an error: failures end up in the report.
    ///
    /// On success the returned ids are the records the remote confirmed; the
    /// caller flips their `synced` flag in the projection.
    pub fn run(
        &mut self,
        trigger: SyncTrigger,
        online: bool,
        backend: &mut dyn RecordBackend,
        remote: &mut dyn RemoteSink,
    ) -> (SyncReport, Vec<RecordId>) {
        let (report, confirmed) = self.drain(trigger, online, backend, remote);
        self.phase = SyncPhase::Idle;
        self.last_report = Some(report.clone());
        (report, confirmed)
    }

    fn drain(
        &mut self,
        trigger: SyncTrigger,
        online: bool,
        backend: &mut dyn RecordBackend,
        remote: &mut dyn RemoteSink,
    ) -> (SyncReport, Vec<RecordId>) {
        if !online {
            debug!("Sync trigger {trigger:?} ignored while offline");
            self.status = SyncStatus::Offline;
            return (SyncReport::Offline, Vec::new());
        }

        let batch = match backend.pending() {
            Ok(batch) => batch,
            Err(e) => return self.fail(format!("reading sync queue: {e}"), 0),
        };
        let Some(through) = batch.last().map(|entry| entry.seq) else {
            self.status = SyncStatus::Online;
            return (SyncReport::NothingPending, Vec::new());
        };

        info!("Sync ({trigger:?}): delivering {} pending operations", batch.len());
        self.phase = SyncPhase::Draining;
        self.status = SyncStatus::Syncing;

        if let Err(e) = remote.apply_batch(&batch) {
            return self.fail(e.to_string(), batch.len());
        }

        if let Err(e) = backend.acknowledge(through) {
            // The remote has the batch; it will get it again next time.
            return self.fail(format!("acknowledging delivered batch: {e}"), batch.len());
        }

        let confirmed = confirmed_record_ids(&batch);
        if let Err(e) = backend.mark_synced(&confirmed) {
            warn!("Could not flag {} records as synced: {e}", confirmed.len());
        }

        self.status = SyncStatus::Synced;
        info!("Sync complete: {} operations acknowledged", batch.len());
        (SyncReport::Drained { delivered: batch.len() }, confirmed)
    }

    fn fail(&mut self, reason: String, retained: usize) -> (SyncReport, Vec<RecordId>) {
        warn!("Sync failed, {retained} operations kept for retry: {reason}");
        self.status = SyncStatus::Failed(reason.clone());
        (SyncReport::Failed { reason, retained }, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat_snapshot::{FlatSnapshot, SnapshotBackend};
    use crate::sync_queue::SyncOperation;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn mock_remote_counts_delivered_entries() {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("reconcile_test_{nanos}"));
        let mut backend = SnapshotBackend::open(FlatSnapshot::in_dir(&dir)).unwrap();
        backend.enqueue(SyncOperation::deleted(1)).unwrap();
        backend.enqueue(SyncOperation::deleted(2)).unwrap();

        let mut remote = MockRemote::default();
        let mut reconciler = Reconciler::new(true);
        let (report, _) = reconciler.run(SyncTrigger::UserRequested, true, &mut backend, &mut remote);
        assert_eq!(report, SyncReport::Drained { delivered: 2 });
        assert_eq!(remote.delivered(), 2);

        let (again, _) = reconciler.run(SyncTrigger::Periodic, true, &mut backend, &mut remote);
        assert_eq!(again, SyncReport::NothingPending);
        assert_eq!(remote.delivered(), 2);
        std::fs::remove_dir_all(dir).ok();
    }
}
