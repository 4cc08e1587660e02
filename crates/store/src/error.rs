//! Errors produced by the store.

use std::fmt;

/// Errors that can occur while talking to the relational store.
#[derive(Debug)]
pub enum DbError {
    /// The underlying SQLite connection returned an error.
    Sqlite(rusqlite::Error),
    /// A uniqueness or foreign-key constraint was violated.
    Integrity(String),
    /// The database could not be locked in time.
    Lock(String),
    /// An argument failed a basic sanity check (e.g. a non-positive count).
    InvalidArgument(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Sqlite(err) => write!(f, "database error: {err}"),
            DbError::Integrity(msg) => write!(f, "integrity error: {msg}"),
            DbError::Lock(msg) => write!(f, "could not lock the database: {msg}"),
            DbError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Integrity(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                DbError::Lock(err.to_string())
            }
            _ => DbError::Sqlite(err),
        }
    }
}
