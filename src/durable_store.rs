//! LMDB-backed durable record store.
//!
//! One environment per store directory, holding these named databases:
//!
//! - `records`: JSON-encoded [`SpeciesRecord`]s keyed by big-endian id, so a
//!   cursor walk returns them in insertion order.
//! - `sync_queue`: JSON-encoded [`SyncEntry`]s keyed by big-endian sequence.
//! - `meta`: the id and sequence counters. Both only ever grow, which keeps
//!   deleted ids from being handed out again.
//! - `idx_family`, `idx_popular_name`, `idx_scientific_name`: non-unique
//!   secondary indexes keyed `<lowercased value>\0<id>`.
//!
//! Each public operation runs in exactly one LMDB transaction.
//!
//! Scans use [`Cursor::iter`] on a fresh cursor, which starts at the first
//! entry and yields nothing for an empty database. `iter_start` and
//! `iter_from` must not be used: they panic when there is no entry to
//! position on.

use std::path::{Path, PathBuf};

use chrono::Utc;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, info, warn};

use crate::app_response::AppResponse;
use crate::backend::{BackendKind, RecordBackend};
use crate::config::CoreConfig;
use crate::species_record::{normalize_family, RecordId, SpeciesRecord};
use crate::sync_queue::{SyncEntry, SyncOperation};

const RECORDS_DB: &str = "records";
const SYNC_QUEUE_DB: &str = "sync_queue";
const META_DB: &str = "meta";
const FAMILY_INDEX_DB: &str = "idx_family";
const POPULAR_NAME_INDEX_DB: &str = "idx_popular_name";
const SCIENTIFIC_NAME_INDEX_DB: &str = "idx_scientific_name";

const NEXT_RECORD_ID: &str = "next_record_id";
const NEXT_QUEUE_SEQ: &str = "next_queue_seq";

pub struct DurableStore {
    env: Environment,
    records: Database,
    sync_queue: Database,
    meta: Database,
    family_index: Database,
    popular_name_index: Database,
    scientific_name_index: Database,
    path: PathBuf,
}

impl DurableStore {
    /// Opens (or creates) the environment at [`CoreConfig::lmdb_dir`].
    ///
    /// Any failure here is reported as [`AppResponse::StoreUnavailable`];
    /// the caller decides whether to fall back.
    pub fn open(config: &CoreConfig) -> Result<Self, AppResponse> {
        let path = config.lmdb_dir();
        Self::open_at(&path, config.map_size_bytes)
            .map_err(|e| AppResponse::StoreUnavailable(format!("{} ({})", e, path.display())))
    }

    fn open_at(path: &Path, map_size: usize) -> Result<Self, AppResponse> {
        info!("Opening LMDB environment at: {}", path.display());
        std::fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_max_dbs(8)
            .set_map_size(map_size)
            .open(path)?;

        let records = env.create_db(Some(RECORDS_DB), DatabaseFlags::empty())?;
        let sync_queue = env.create_db(Some(SYNC_QUEUE_DB), DatabaseFlags::empty())?;
        let meta = env.create_db(Some(META_DB), DatabaseFlags::empty())?;
        let family_index = env.create_db(Some(FAMILY_INDEX_DB), DatabaseFlags::empty())?;
        let popular_name_index = env.create_db(Some(POPULAR_NAME_INDEX_DB), DatabaseFlags::empty())?;
        let scientific_name_index = env.create_db(Some(SCIENTIFIC_NAME_INDEX_DB), DatabaseFlags::empty())?;

        Ok(Self {
            env,
            records,
            sync_queue,
            meta,
            family_index,
            popular_name_index,
            scientific_name_index,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_by_id(&self, id: RecordId) -> Result<Option<SpeciesRecord>, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let found = read_record(&txn, self.records, id)?;
        txn.abort();
        Ok(found)
    }

    /// Records whose family equals `family`, ignoring case, via `idx_family`.
    pub fn find_by_family(&self, family: &str) -> Result<Vec<SpeciesRecord>, AppResponse> {
        self.find_by_index(self.family_index, family)
    }

    pub fn find_by_popular_name(&self, name: &str) -> Result<Vec<SpeciesRecord>, AppResponse> {
        self.find_by_index(self.popular_name_index, name)
    }

    pub fn find_by_scientific_name(&self, name: &str) -> Result<Vec<SpeciesRecord>, AppResponse> {
        self.find_by_index(self.scientific_name_index, name)
    }

    fn find_by_index(&self, index: Database, value: &str) -> Result<Vec<SpeciesRecord>, AppResponse> {
        let prefix = index_prefix(value);
        let txn = self.env.begin_ro_txn()?;

        let ids = {
            let mut cursor = txn.open_ro_cursor(index)?;
            let mut ids = Vec::new();
            for (key, value) in cursor.iter() {
                if key < prefix.as_slice() {
                    continue;
                }
                if !key.starts_with(&prefix) {
                    break;
                }
                ids.push(decode_u64(value)?);
            }
            ids
        };

        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match read_record(&txn, self.records, id)? {
                Some(record) => found.push(record),
                None => warn!("Index entry points at missing record {id}"),
            }
        }
        txn.abort();
        Ok(found)
    }

    pub fn record_count(&self) -> Result<usize, AppResponse> {
        self.count_entries(self.records)
    }

    pub fn pending_count(&self) -> Result<usize, AppResponse> {
        self.count_entries(self.sync_queue)
    }

    fn count_entries(&self, db: Database) -> Result<usize, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let count = {
            let mut cursor = txn.open_ro_cursor(db)?;
            cursor.iter().count()
        };
        txn.abort();
        Ok(count)
    }

    /// Removes every record and index entry. The sync queue and counters stay.
    pub fn clear_all_records(&self) -> Result<(), AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        self.clear_records_in(&mut txn)?;
        txn.commit()?;
        info!("All records cleared from {}", self.path.display());
        Ok(())
    }

    /// Flushes the environment to disk; dropping the store closes it.
    pub fn close_database(self) -> Result<(), AppResponse> {
        self.env.sync(true)?;
        info!("LMDB environment at {} closed", self.path.display());
        Ok(())
    }

    fn clear_records_in(&self, txn: &mut RwTransaction) -> Result<(), AppResponse> {
        txn.clear_db(self.records)?;
        txn.clear_db(self.family_index)?;
        txn.clear_db(self.popular_name_index)?;
        txn.clear_db(self.scientific_name_index)?;
        Ok(())
    }

    fn write_record(&self, txn: &mut RwTransaction, record: &SpeciesRecord, id: RecordId) -> Result<(), AppResponse> {
        let json = serde_json::to_vec(record)?;
        txn.put(self.records, &id.to_be_bytes(), &json, WriteFlags::empty())?;

        let id_bytes = id.to_be_bytes();
        for (index, value) in self.index_values(record) {
            if value.trim().is_empty() {
                continue;
            }
            txn.put(index, &index_key(value, id), &id_bytes, WriteFlags::empty())?;
        }
        Ok(())
    }

    fn unindex(&self, txn: &mut RwTransaction, record: &SpeciesRecord, id: RecordId) -> Result<(), AppResponse> {
        for (index, value) in self.index_values(record) {
            if value.trim().is_empty() {
                continue;
            }
            match txn.del(index, &index_key(value, id), None) {
                Ok(()) | Err(lmdb::Error::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn index_values<'a>(&self, record: &'a SpeciesRecord) -> [(Database, &'a str); 3] {
        [
            (self.family_index, record.effective_family()),
            (self.popular_name_index, record.popular_name.as_str()),
            (self.scientific_name_index, record.scientific_name.as_str()),
        ]
    }
}

impl RecordBackend for DurableStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    fn load_all(&self) -> Result<Vec<SpeciesRecord>, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let records = {
            let mut cursor = txn.open_ro_cursor(self.records)?;
            let mut records = Vec::new();
            for (_key, value) in cursor.iter() {
                records.push(serde_json::from_slice::<SpeciesRecord>(value)?);
            }
            records
        };
        txn.abort();
        debug!("Loaded {} records from LMDB", records.len());
        Ok(records)
    }

    fn persist(&mut self, mut record: SpeciesRecord) -> Result<SpeciesRecord, AppResponse> {
        record.validate().map_err(AppResponse::ValidationError)?;

        let mut txn = self.env.begin_rw_txn()?;
        let next_id = read_counter(&txn, self.meta, NEXT_RECORD_ID)?;

        let id = match record.id {
            Some(id) => {
                if let Some(previous) = read_record(&txn, self.records, id)? {
                    if record.created_at.is_none() {
                        record.created_at = previous.created_at;
                    }
                    if record.registered_on.is_empty() {
                        record.registered_on = previous.registered_on.clone();
                    }
                    self.unindex(&mut txn, &previous, id)?;
                }
                if id >= next_id {
                    write_counter(&mut txn, self.meta, NEXT_RECORD_ID, id + 1)?;
                }
                id
            }
            None => {
                write_counter(&mut txn, self.meta, NEXT_RECORD_ID, next_id + 1)?;
                next_id
            }
        };

        record.id = Some(id);
        record.stamp_for_persist(Utc::now());
        self.write_record(&mut txn, &record, id)?;
        txn.commit()?;

        debug!("Persisted record {id}");
        Ok(record)
    }

    fn next_id(&self) -> Result<RecordId, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let next = read_counter(&txn, self.meta, NEXT_RECORD_ID)?;
        txn.abort();
        Ok(next)
    }

    fn delete(&mut self, id: RecordId) -> Result<bool, AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        let Some(previous) = read_record(&txn, self.records, id)? else {
            txn.abort();
            return Ok(false);
        };

        self.unindex(&mut txn, &previous, id)?;
        txn.del(self.records, &id.to_be_bytes(), None)?;
        txn.commit()?;
        debug!("Deleted record {id}");
        Ok(true)
    }

    fn replace_all(&mut self, records: &[SpeciesRecord]) -> Result<(), AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        self.clear_records_in(&mut txn)?;

        let mut next_id = read_counter(&txn, self.meta, NEXT_RECORD_ID)?;
        let highest = records.iter().filter_map(|r| r.id).max().unwrap_or(0);
        if highest >= next_id {
            next_id = highest + 1;
        }

        for record in records {
            let mut record = record.clone();
            record.family = normalize_family(&record.family);
            let id = match record.id {
                Some(id) => id,
                None => {
                    let id = next_id;
                    next_id += 1;
                    record.id = Some(id);
                    id
                }
            };
            self.write_record(&mut txn, &record, id)?;
        }

        write_counter(&mut txn, self.meta, NEXT_RECORD_ID, next_id)?;
        txn.commit()?;
        info!("Replaced durable contents with {} records", records.len());
        Ok(())
    }

    fn mark_synced(&mut self, ids: &[RecordId]) -> Result<(), AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        for &id in ids {
            if let Some(mut record) = read_record(&txn, self.records, id)? {
                record.synced = true;
                let json = serde_json::to_vec(&record)?;
                txn.put(self.records, &id.to_be_bytes(), &json, WriteFlags::empty())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn enqueue(&mut self, operation: SyncOperation) -> Result<SyncEntry, AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        let seq = read_counter(&txn, self.meta, NEXT_QUEUE_SEQ)?;
        let entry = operation.into_entry(seq);

        let json = serde_json::to_vec(&entry)?;
        txn.put(self.sync_queue, &seq.to_be_bytes(), &json, WriteFlags::empty())?;
        write_counter(&mut txn, self.meta, NEXT_QUEUE_SEQ, seq + 1)?;
        txn.commit()?;
        Ok(entry)
    }

    fn pending(&self) -> Result<Vec<SyncEntry>, AppResponse> {
        let txn = self.env.begin_ro_txn()?;
        let entries = {
            let mut cursor = txn.open_ro_cursor(self.sync_queue)?;
            let mut entries = Vec::new();
            for (_key, value) in cursor.iter() {
                entries.push(serde_json::from_slice::<SyncEntry>(value)?);
            }
            entries
        };
        txn.abort();
        Ok(entries)
    }

    fn acknowledge(&mut self, through: u64) -> Result<usize, AppResponse> {
        let mut txn = self.env.begin_rw_txn()?;
        let doomed = {
            let mut cursor = txn.open_ro_cursor(self.sync_queue)?;
            let mut doomed = Vec::new();
            for (key, _value) in cursor.iter() {
                let seq = decode_u64(key)?;
                if seq > through {
                    break;
                }
                doomed.push(seq);
            }
            doomed
        };

        for seq in &doomed {
            txn.del(self.sync_queue, &seq.to_be_bytes(), None)?;
        }
        txn.commit()?;
        Ok(doomed.len())
    }
}

fn read_record<T: Transaction>(txn: &T, db: Database, id: RecordId) -> Result<Option<SpeciesRecord>, AppResponse> {
    match txn.get(db, &id.to_be_bytes()) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_counter<T: Transaction>(txn: &T, db: Database, key: &str) -> Result<u64, AppResponse> {
    match txn.get(db, &key) {
        Ok(bytes) => decode_u64(bytes),
        Err(lmdb::Error::NotFound) => Ok(1),
        Err(e) => Err(e.into()),
    }
}

fn write_counter(txn: &mut RwTransaction, db: Database, key: &str, value: u64) -> Result<(), AppResponse> {
    txn.put(db, &key, &value.to_be_bytes(), WriteFlags::empty())?;
    Ok(())
}

fn decode_u64(bytes: &[u8]) -> Result<u64, AppResponse> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| AppResponse::DatabaseError(format!("Expected 8-byte key, found {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn index_prefix(value: &str) -> Vec<u8> {
    let mut prefix = value.trim().to_lowercase().into_bytes();
    prefix.push(0);
    prefix
}

fn index_key(value: &str, id: RecordId) -> Vec<u8> {
    let mut key = index_prefix(value);
    key.extend_from_slice(&id.to_be_bytes());
    key
}
