//! # LeafTag Core
//!
//! Offline-first persistence and synchronization core for field botanical
//! species records. Records live in an LMDB environment; when that cannot be
//! opened the session runs on a flat JSON snapshot instead. Every mutation is
//! queued for a remote counterpart and the queue is drained whenever
//! connectivity returns or the user asks for a sync.
//!
//! ## Features
//!
//! - **LMDB durable store** with secondary indexes on family and names
//! - **Snapshot fallback** chosen once at startup, mirrored after every mutation
//! - **Sync queue** with at-least-once batch reconciliation
//! - **One-time migration** of legacy snapshot data into an empty durable store
//! - **In-memory projection** serving search, grouping and statistics
//! - **FFI surface** exchanging JSON, for a UI running in another runtime
//!
//! ## Quick Start
//!
//! ```no_run
//! use leaftag_core::{CoreConfig, RecordCore, SearchQuery, SpeciesRecord};
//!
//! let mut core = RecordCore::open(CoreConfig::in_dir("field_data"))?;
//! let saved = core.save(SpeciesRecord::new("Jatobá", "Hymenaea courbaril", "Fabaceae"))?;
//! assert!(saved.id.is_some());
//!
//! let hits = core.search(&SearchQuery::text("jatob"));
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), leaftag_core::AppResponse>(())
//! ```
//!
//! ## FFI Functions
//!
//! - [`open_core`] / [`close_core`] - Session lifecycle
//! - [`save_record`] / [`delete_record`] - Mutations
//! - [`get_record`] / [`get_all_records`] / [`search_records`] / [`group_by_family`] / [`record_stats`] - Reads
//! - [`set_online`] / [`request_sync`] / [`pending_sync_count`] - Reconciliation
//! - [`create_backup`] / [`restore_backup`] / [`export_csv`] - Export and restore
//! - [`free_response`] - Releases strings returned by the functions above

pub mod app_response;
pub mod backend;
pub mod backup;
pub mod config;
pub mod durable_store;
pub mod flat_snapshot;
pub mod migration;
pub mod projection;
pub mod reconcile;
pub mod record_core;
pub mod species_record;
pub mod sync_queue;
pub mod triggers;

pub use crate::app_response::AppResponse;
pub use crate::config::CoreConfig;
pub use crate::projection::SearchQuery;
pub use crate::record_core::RecordCore;
pub use crate::species_record::SpeciesRecord;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde::Serialize;

use crate::species_record::RecordId;

/// Opens a core session.
///
/// `config_json` is a [`CoreConfig`] as JSON; a null pointer or `{}` selects
/// the defaults.
///
/// # Returns
///
/// A pointer to the session, or null if the configuration is unusable.
/// A durable store that fails to open does not make this return null; the
/// session simply runs on the snapshot. Release it with [`close_core`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn open_core(config_json: *const c_char) -> *mut RecordCore {
    let config = if config_json.is_null() {
        CoreConfig::default()
    } else {
        let json = match unsafe { CStr::from_ptr(config_json).to_str() } {
            Ok(s) => s,
            Err(e) => {
                warn!("Invalid UTF-8 in config parameter: {e}");
                return std::ptr::null_mut();
            }
        };
        match CoreConfig::from_json(json) {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected configuration: {e}");
                return std::ptr::null_mut();
            }
        }
    };

    match RecordCore::open(config) {
        Ok(core) => {
            info!("✅ Core opened on {:?} backend", core.backend_kind());
            Box::into_raw(Box::new(core))
        }
        Err(e) => {
            warn!("❌ Failed to open core: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Creates or updates a record.
///
/// The JSON record is inserted when it carries no `id` and replaces the
/// stored record otherwise. On success the response holds the saved record,
/// id included.
///
/// # JSON Format
///
/// ```json
/// {
///   "popularName": "Jatobá",
///   "scientificName": "Hymenaea courbaril",
///   "family": "Fabaceae",
///   "site": "Trilha do córrego",
///   "notes": "",
///   "photos": [],
///   "coordinates": null
/// }
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn save_record(state: *mut RecordCore, json_ptr: *const c_char) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let record: SpeciesRecord = match serde_json::from_str(&json_str) {
        Ok(record) => record,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Invalid JSON: {e}"));
            return response_to_c_string(&error);
        }
    };

    match core.save(record) {
        Ok(saved) => ok_json(&saved),
        Err(e) => response_to_c_string(&e),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_record(state: *mut RecordCore, id: RecordId) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    match core.delete(id) {
        Ok(_) => response_to_c_string(&AppResponse::success("Record deleted successfully")),
        Err(e) => response_to_c_string(&e),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_record(state: *mut RecordCore, id: RecordId) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    match core.get(id) {
        Some(record) => ok_json(record),
        None => response_to_c_string(&AppResponse::NotFound(format!("No record found with id: {id}"))),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_all_records(state: *mut RecordCore) -> *const c_char {
    match core_mut(state) {
        Ok(core) => ok_json(&core.all()),
        Err(err) => err,
    }
}

/// Runs a search over the projection.
///
/// `query_json` follows [`SearchQuery`]:
/// `{"text": "ipê", "requirePhoto": false, "requireGps": true}`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn search_records(state: *mut RecordCore, query_json: *const c_char) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(query_json, "query") {
        Ok(json) => json,
        Err(err) => return err,
    };

    match serde_json::from_str::<SearchQuery>(&json_str) {
        Ok(query) => ok_json(&core.search(&query)),
        Err(e) => response_to_c_string(&AppResponse::SerializationError(format!("Invalid query: {e}"))),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn group_by_family(state: *mut RecordCore) -> *const c_char {
    match core_mut(state) {
        Ok(core) => ok_json(&core.group_by_family()),
        Err(err) => err,
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn record_stats(state: *mut RecordCore) -> *const c_char {
    match core_mut(state) {
        Ok(core) => ok_json(&core.stats()),
        Err(err) => err,
    }
}

/// Reports a connectivity change from the host.
///
/// Going from offline to online starts a reconciliation pass; the response
/// then carries its report, otherwise `null`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_online(state: *mut RecordCore, online: bool) -> *const c_char {
    match core_mut(state) {
        Ok(core) => ok_json(&core.set_online(online)),
        Err(err) => err,
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn request_sync(state: *mut RecordCore) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    match core.request_sync() {
        Ok(report) => ok_json(&report),
        Err(e) => response_to_c_string(&e),
    }
}

/// Number of queued operations, or `-1` for a null state pointer.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn pending_sync_count(state: *mut RecordCore) -> i64 {
    match unsafe { state.as_ref() } {
        Some(core) => core.pending_sync_count() as i64,
        None => -1,
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_backup(state: *mut RecordCore) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    match core.create_backup() {
        Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
        Err(e) => response_to_c_string(&e),
    }
}

/// Replaces all records with the contents of a backup document.
///
/// Documents without a top-level `species` array are rejected with
/// `RestoreFormatError` and nothing is changed.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn restore_backup(state: *mut RecordCore, json_ptr: *const c_char) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(json_ptr, "backup") {
        Ok(json) => json,
        Err(err) => return err,
    };

    match core.restore_backup(&json_str) {
        Ok(count) => response_to_c_string(&AppResponse::Ok(format!("Backup restored: {count} records"))),
        Err(e) => response_to_c_string(&e),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn export_csv(state: *mut RecordCore) -> *const c_char {
    let core = match core_mut(state) {
        Ok(core) => core,
        Err(err) => return err,
    };

    match core.export_csv() {
        Ok(csv) => response_to_c_string(&AppResponse::Ok(csv)),
        Err(e) => response_to_c_string(&e),
    }
}

/// Ends the session and releases it. The pointer must not be used afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_core(state: *mut RecordCore) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_core".to_string());
        return response_to_c_string(&error);
    }

    let core = unsafe { Box::from_raw(state) };
    info!("Closing core session ({:?} backend)", core.backend_kind());
    drop(core);
    response_to_c_string(&AppResponse::success("Core closed successfully"))
}

/// Frees a string previously returned by this library.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr as *mut c_char) });
}

fn core_mut<'a>(state: *mut RecordCore) -> Result<&'a mut RecordCore, *const c_char> {
    match unsafe { state.as_mut() } {
        Some(core) => Ok(core),
        None => Err(response_to_c_string(&AppResponse::BadRequest("Null state pointer".to_string()))),
    }
}

/// Wraps a serialized value in `AppResponse::Ok`.
fn ok_json<T: Serialize + ?Sized>(value: &T) -> *const c_char {
    match serde_json::to_string(value) {
        Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Serializes the response to JSON and hands ownership to the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer to an owned `String`.
///
/// On failure the `Err` side already holds the serialized error response.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
