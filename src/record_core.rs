//! The state manager owning the projection, the session backend and sync.
//!
//! Every mutation runs the same sequence: backend write, queue append,
//! projection update, snapshot mirror. Mutating methods take `&mut self`, so
//! a second operation cannot start before the first finished all four steps.
//! The backend write and the mirror are separate transactions; a crash in
//! between leaves the snapshot one mutation behind the durable store.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use log::{debug, info, warn};

use crate::app_response::AppResponse;
use crate::backend::{BackendKind, RecordBackend};
use crate::backup;
use crate::config::CoreConfig;
use crate::durable_store::DurableStore;
use crate::flat_snapshot::{FlatSnapshot, SnapshotBackend};
use crate::migration::{migrate_snapshot, MigrationOutcome};
use crate::projection::{Projection, RecordStats, SearchQuery};
use crate::reconcile::{MockRemote, Reconciler, RemoteSink, SyncPhase, SyncReport, SyncStatus, SyncTrigger};
use crate::species_record::{RecordId, SpeciesRecord};
use crate::sync_queue::SyncOperation;
use crate::triggers::{PeriodicSync, SearchDebouncer};

pub struct RecordCore {
    backend: Box<dyn RecordBackend>,
    snapshot: FlatSnapshot,
    projection: Projection,
    reconciler: Reconciler,
    remote: Box<dyn RemoteSink>,
    online: bool,
    search_debouncer: SearchDebouncer,
    periodic_sync: Option<PeriodicSync>,
    migration: MigrationOutcome,
    /// Records that only reached the projection and snapshot after a failed
    /// insert. Their ids are provisional until a later save persists them.
    unpersisted: BTreeSet<RecordId>,
}

impl RecordCore {
    /// Opens the core with the mock remote.
    pub fn open(config: CoreConfig) -> Result<Self, AppResponse> {
        Self::open_with_remote(config, Box::new(MockRemote::default()))
    }

    /// Opens the durable store once and commits to a backend for the session.
    ///
    /// Only an unusable configuration is an error; a durable store that will
    /// not open or load just selects the snapshot backend.
    pub fn open_with_remote(config: CoreConfig, remote: Box<dyn RemoteSink>) -> Result<Self, AppResponse> {
        config.validate()?;
        let durable = DurableStore::open(&config).map(|store| Box::new(store) as Box<dyn RecordBackend>);
        Self::start(config, durable, remote)
    }

    /// Runs startup around an already built primary backend.
    ///
    /// Migration and the snapshot fallback behave exactly as in
    /// [`RecordCore::open_with_remote`].
    pub fn with_backend(
        config: CoreConfig,
        backend: Box<dyn RecordBackend>,
        remote: Box<dyn RemoteSink>,
    ) -> Result<Self, AppResponse> {
        config.validate()?;
        Self::start(config, Ok(backend), remote)
    }

    fn start(
        config: CoreConfig,
        primary: Result<Box<dyn RecordBackend>, AppResponse>,
        remote: Box<dyn RemoteSink>,
    ) -> Result<Self, AppResponse> {
        let snapshot = FlatSnapshot::in_dir(&config.base_dir);

        let loaded = primary.and_then(|backend| {
            let records = backend.load_all()?;
            Ok((backend, records))
        });

        // `Err` carries the migration outcome to report with the fallback.
        let selected = match loaded {
            Ok((mut backend, mut records)) => match migrate_snapshot(backend.as_mut(), &snapshot, &mut records) {
                Ok(outcome) => {
                    info!("Durable store ready with {} records", records.len());
                    Ok((backend, records, outcome))
                }
                Err(e) => {
                    warn!("Snapshot migration failed, running on the snapshot this session: {e}");
                    Err(MigrationOutcome::Deferred { reason: e.to_string() })
                }
            },
            Err(e) => {
                warn!("Durable store unavailable, using snapshot for this session: {e}");
                Err(MigrationOutcome::NothingToMigrate)
            }
        };

        let (backend, records, migration) = match selected {
            Ok(chosen) => chosen,
            Err(migration) => {
                let fallback = SnapshotBackend::open(snapshot.clone())?;
                let records = fallback.load_all()?;
                (Box::new(fallback) as Box<dyn RecordBackend>, records, migration)
            }
        };

        Ok(Self::assemble(config, backend, snapshot, records, remote, migration))
    }

    fn assemble(
        config: CoreConfig,
        backend: Box<dyn RecordBackend>,
        snapshot: FlatSnapshot,
        records: Vec<SpeciesRecord>,
        remote: Box<dyn RemoteSink>,
        migration: MigrationOutcome,
    ) -> Self {
        Self {
            backend,
            snapshot,
            projection: Projection::new(records),
            reconciler: Reconciler::new(config.start_online),
            remote,
            online: config.start_online,
            search_debouncer: SearchDebouncer::new(config.search_debounce()),
            periodic_sync: config.periodic_sync_interval().map(PeriodicSync::new),
            migration,
            unpersisted: BTreeSet::new(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn migration_outcome(&self) -> &MigrationOutcome {
        &self.migration
    }

    // ---- reads -------------------------------------------------------------

    pub fn all(&self) -> &[SpeciesRecord] {
        self.projection.all()
    }

    pub fn get(&self, id: RecordId) -> Option<&SpeciesRecord> {
        self.projection.find(id)
    }

    pub fn by_family(&self, family: &str) -> Vec<SpeciesRecord> {
        self.projection.by_family(family)
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<SpeciesRecord> {
        self.projection.search(query)
    }

    pub fn group_by_family(&self) -> BTreeMap<String, Vec<SpeciesRecord>> {
        self.projection.group_by_family()
    }

    pub fn family_names(&self, filter: &str) -> Vec<String> {
        self.projection.family_names(filter)
    }

    pub fn stats(&self) -> RecordStats {
        self.projection.stats()
    }

    /// Re-reads the backend without touching the projection.
    pub fn load_all(&self) -> Result<Vec<SpeciesRecord>, AppResponse> {
        self.backend.load_all()
    }

    pub fn pending_sync_count(&self) -> usize {
        match self.backend.pending() {
            Ok(entries) => entries.len(),
            Err(e) => {
                warn!("Could not read sync queue: {e}");
                0
            }
        }
    }

    // ---- mutations ---------------------------------------------------------

    /// Creates (`id == None`) or updates a record.
    ///
    /// Updates keep the stored `created_at` and `registered_on` whatever the
    /// caller sent. If the backend write fails the record still reaches the
    /// projection and the snapshot, and `PersistFailure` is returned so the
    /// UI can show a notice. A new record gets a provisional id in that case,
    /// so saving it again with that id updates it instead of duplicating it.
    pub fn save(&mut self, mut record: SpeciesRecord) -> Result<SpeciesRecord, AppResponse> {
        record.validate().map_err(AppResponse::ValidationError)?;

        if let Some(id) = record.id {
            let Some(existing) = self.projection.find(id) else {
                return Err(AppResponse::NotFound(format!("No record found with id: {id}")));
            };
            record.created_at = existing.created_at;
            record.registered_on = existing.registered_on.clone();
        }

        let was_new = record.id.map_or(true, |id| self.unpersisted.contains(&id));
        if record.id.is_none() && !self.unpersisted.is_empty() {
            // The backend counter does not know about provisional ids.
            record.id = Some(self.provisional_id());
        }

        match self.backend.persist(record.clone()) {
            Ok(saved) => {
                if let Some(id) = saved.id {
                    self.unpersisted.remove(&id);
                }
                if let Err(e) = self.backend.enqueue(SyncOperation::saved(&saved, was_new)) {
                    warn!("Could not queue record {:?} for sync: {e}", saved.id);
                }
                self.projection.upsert(saved.clone());
                self.mirror_snapshot();
                Ok(saved)
            }
            Err(e) => {
                let id = match record.id {
                    Some(id) => id,
                    None => self.provisional_id(),
                };
                warn!("Persist of record {id} failed, keeping it in snapshot only: {e}");
                record.id = Some(id);
                record.stamp_for_persist(chrono::Utc::now());
                if was_new {
                    self.unpersisted.insert(id);
                }
                self.projection.upsert(record);
                self.mirror_snapshot();
                Err(AppResponse::PersistFailure(format!("{e}; kept locally as record {id}")))
            }
        }
    }

    pub fn delete(&mut self, id: RecordId) -> Result<SpeciesRecord, AppResponse> {
        if self.projection.find(id).is_none() {
            return Err(AppResponse::NotFound(format!("No record found with id: {id}")));
        }

        let local_only = self.unpersisted.remove(&id);
        let outcome = self.backend.delete(id);
        let removed = self.projection.remove(id);
        let removed = removed.ok_or_else(|| AppResponse::NotFound(format!("No record found with id: {id}")))?;

        match outcome {
            Ok(found) => {
                if local_only {
                    debug!("Dropped provisional record {id}; nothing to sync");
                } else {
                    if !found {
                        warn!("Record {id} was in the projection but not in the backend");
                    }
                    if let Err(e) = self.backend.enqueue(SyncOperation::deleted(id)) {
                        warn!("Could not queue deletion of {id}: {e}");
                    }
                }
                self.mirror_snapshot();
                Ok(removed)
            }
            Err(e) => {
                warn!("Delete of {id} failed in backend, removed from snapshot only: {e}");
                self.mirror_snapshot();
                Err(AppResponse::PersistFailure(e.to_string()))
            }
        }
    }

    /// Next id that neither the backend nor the projection has handed out.
    fn provisional_id(&self) -> RecordId {
        let after_projection = self
            .projection
            .all()
            .iter()
            .filter_map(|r| r.id)
            .max()
            .map_or(1, |id| id + 1);
        match self.backend.next_id() {
            Ok(next) => next.max(after_projection),
            Err(e) => {
                warn!("Could not read the backend id counter: {e}");
                after_projection
            }
        }
    }

    /// Replaces everything with the records of a backup document.
    ///
    /// A malformed document changes nothing. Restored records keep their ids
    /// and are not queued for sync.
    pub fn restore_backup(&mut self, json: &str) -> Result<usize, AppResponse> {
        let records = backup::parse_backup(json)?;
        for record in &records {
            record.validate().map_err(AppResponse::RestoreFormatError)?;
        }

        self.backend.replace_all(&records)?;
        let restored = self.backend.load_all()?;
        let count = restored.len();
        self.unpersisted.clear();
        self.projection.replace_all(restored);
        self.mirror_snapshot();
        info!("Backup restored: {count} records");
        Ok(count)
    }

    pub fn create_backup(&self) -> Result<String, AppResponse> {
        backup::create_backup(self.projection.all())
    }

    pub fn export_csv(&self) -> Result<String, AppResponse> {
        backup::export_csv(self.projection.all())
    }

    fn mirror_snapshot(&self) {
        if let Err(e) = self.snapshot.save_all(self.projection.all()) {
            warn!("Snapshot mirror failed: {e}");
        }
    }

    // ---- sync --------------------------------------------------------------

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn sync_status(&self) -> &SyncStatus {
        self.reconciler.status()
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.reconciler.phase()
    }

    pub fn last_sync_report(&self) -> Option<&SyncReport> {
        self.reconciler.last_report()
    }

    /// Records a connectivity change; regaining it starts a pass.
    pub fn set_online(&mut self, online: bool) -> Option<SyncReport> {
        let regained = online && !self.online;
        self.online = online;
        self.reconciler.connectivity_changed(online);
        if regained {
            Some(self.reconcile(SyncTrigger::ConnectivityRegained))
        } else {
            None
        }
    }

    /// Explicit user request. Returns `BadRequest` while offline.
    pub fn request_sync(&mut self) -> Result<SyncReport, AppResponse> {
        if !self.online {
            return Err(AppResponse::BadRequest("Connect to the internet to sync".to_string()));
        }
        match self.reconcile(SyncTrigger::UserRequested) {
            SyncReport::Failed { reason, .. } => Err(AppResponse::SyncFailure(reason)),
            report => Ok(report),
        }
    }

    /// Drives timer-based work: periodic reconciliation and debounced search.
    pub fn tick(&mut self, now: Instant) -> (Option<SyncReport>, Option<Vec<SpeciesRecord>>) {
        let due = self.periodic_sync.as_ref().is_some_and(|p| p.due(now));
        let sync = if due && self.online {
            if let Some(periodic) = self.periodic_sync.as_mut() {
                periodic.mark_attempt(now);
            }
            Some(self.reconcile(SyncTrigger::Periodic))
        } else {
            None
        };

        let search = self
            .search_debouncer
            .poll(now)
            .map(|term| self.projection.search(&SearchQuery::text(&term)));
        (sync, search)
    }

    pub fn search_input(&mut self, term: &str, now: Instant) {
        self.search_debouncer.input(term, now);
    }

    fn reconcile(&mut self, trigger: SyncTrigger) -> SyncReport {
        let (report, confirmed) =
            self.reconciler
                .run(trigger, self.online, self.backend.as_mut(), self.remote.as_mut());
        if !confirmed.is_empty() {
            self.projection.set_synced(&confirmed);
            self.mirror_snapshot();
        }
        report
    }
}
