//! Crate-wide error type.
//!
//! Every fallible operation in the storage core returns [`Result<T>`]. The
//! variants mirror the error taxonomy callers are expected to branch on:
//! `NotFound`/`AlreadyExists`/`ConstraintViolation` are ordinary, recoverable
//! outcomes of a write; `CorruptWal`/`Io` are fatal and require operator
//! intervention or a reopen.

use std::io;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, NornicError>;

#[derive(Debug, Error)]
pub enum NornicError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("constraint {constraint} violated by value {value}")]
    ConstraintViolation { constraint: String, value: String },

    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    #[error("invalid embedding dimensions: expected {expected}, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("transaction is no longer active")]
    TransactionClosed,

    #[error("concurrent conflict: {0}")]
    ConcurrentConflict(String),

    #[error("WAL corruption detected at sequence {0}")]
    CorruptWal(u64),

    #[error("WAL is poisoned by a prior I/O failure; reopen the store")]
    WalPoisoned,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),
}

/// Acquires a `std::sync::Mutex`, converting lock poisoning into a
/// [`NornicError::Serialization`]; a poisoned lock means some other thread
/// panicked while holding it, which we treat as a bug, not a recoverable
/// condition, but we still surface it rather than panicking again here.
pub fn lock_mutex<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("mutex poisoned - a prior holder panicked");
        NornicError::Serialization("internal lock poisoned".into())
    })
}

pub fn read_lock<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| {
        error!("rwlock poisoned on read - a prior holder panicked");
        NornicError::Serialization("internal lock poisoned".into())
    })
}

pub fn write_lock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| {
        error!("rwlock poisoned on write - a prior holder panicked");
        NornicError::Serialization("internal lock poisoned".into())
    })
}
