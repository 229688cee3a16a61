use std::fmt::{Display, Formatter};

use lmdb::Error as LmdbError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

/// Outcome envelope shared by the library API and the FFI surface.
///
/// Every fallible core operation returns `Result<T, AppResponse>`; the FFI
/// layer serializes whichever variant it ends up with into a JSON C string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    /// The durable store could not be opened; the session runs on the snapshot.
    StoreUnavailable(String),
    /// A user-initiated write missed the durable store and landed in the snapshot.
    PersistFailure(String),
    /// A reconciliation batch was rejected; the queue is untouched.
    SyncFailure(String),
    /// A backup document without a `species` record sequence.
    RestoreFormatError(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            AppResponse::PersistFailure(msg) => write!(f, "Persist failure: {}", msg),
            AppResponse::SyncFailure(msg) => write!(f, "Sync failure: {}", msg),
            AppResponse::RestoreFormatError(msg) => write!(f, "Invalid backup: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl std::error::Error for AppResponse {}

impl From<LmdbError> for AppResponse {
    fn from(err: LmdbError) -> Self {
        match err {
            LmdbError::NotFound => AppResponse::NotFound("Key not found in LMDB".to_string()),
            LmdbError::Corrupted | LmdbError::PageNotFound =>
                AppResponse::DatabaseError(format!("Database is corrupted: {}", err)),
            LmdbError::MapFull =>
                AppResponse::DatabaseError("LMDB map is full; raise map_size_bytes".to_string()),
            _ => AppResponse::DatabaseError(format!("LMDB error: {}", err)),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<csv::Error> for AppResponse {
    fn from(err: csv::Error) -> Self {
        AppResponse::SerializationError(format!("CSV error: {}", err))
    }
}

impl From<std::io::Error> for AppResponse {
    fn from(err: std::io::Error) -> Self {
        AppResponse::DatabaseError(format!("IO error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    /// Whether this is a failure the user should see as a transient notice.
    pub fn is_user_notice(&self) -> bool {
        matches!(
            self,
            AppResponse::PersistFailure(_) | AppResponse::RestoreFormatError(_) | AppResponse::NotFound(_)
        )
    }
}
