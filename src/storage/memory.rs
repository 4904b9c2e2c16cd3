//! In-memory storage backend for testing.
//!
//! Provides [`InMemoryStorage`], a thread-safe in-memory implementation of
//! the storage traits. Ideal for unit and integration tests where file I/O
//! is undesirable.

use std::sync::Mutex;

#[cfg(feature = "async")]
use core::future::{self, Future};

use super::{Dataset, Transaction};
use crate::error::{EduPerksError, Result};
#[cfg(any(feature = "async", feature = "blocking"))]
use crate::models::{AuditLogEntry, Merchant, Offer, Redemption, Student};

/// Thread-safe in-memory storage for testing.
///
/// This type implements both [`super::Storage`] (async) and
/// [`super::BlockingStorage`] (blocking) traits, providing a zero-setup
/// storage backend for tests.
///
/// # Isolation
///
/// Every read and every transaction holds the same mutex for its whole
/// duration, so transactions are serializable.
///
/// # Example
///
/// ```rust
/// use edu_perks::storage::InMemoryStorage;
///
/// let storage = InMemoryStorage::new();
/// // Use with Marketplace or MarketplaceBlocking builders:
/// // MarketplaceBlocking::builder().storage(storage).build()
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    /// All state behind a single mutex for thread-safe interior mutability.
    inner: Mutex<Dataset>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the inner lock and applies a closure.
    fn with_lock<R, F: FnOnce(&mut Dataset) -> R>(&self, op: F) -> Result<R> {
        let mut inner = self.inner.lock().map_err(|err| lock_error(&err))?;
        Ok(op(&mut inner))
    }

    /// Runs `op` under the lock and commits its changes on success.
    fn run_transaction<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        self.with_lock(|dataset| {
            let mut tx = dataset.transaction();
            let output = op(&mut tx)?;
            let changes = tx.into_changes();
            dataset.apply(changes);
            Ok(output)
        })?
    }
}

/// Wraps a mutex poison error.
fn lock_error<T>(err: &std::sync::PoisonError<T>) -> EduPerksError {
    EduPerksError::Storage(err.to_string().into())
}

// ── BlockingStorage implementation ──────────────────────────────────────

#[cfg(feature = "blocking")]
impl super::BlockingStorage for InMemoryStorage {
    #[inline]
    fn offers(&self) -> Result<Vec<Offer>> {
        self.with_lock(|dataset| dataset.offers())
    }

    #[inline]
    fn students(&self) -> Result<Vec<Student>> {
        self.with_lock(|dataset| dataset.students())
    }

    #[inline]
    fn merchants(&self) -> Result<Vec<Merchant>> {
        self.with_lock(|dataset| dataset.merchants())
    }

    #[inline]
    fn redemptions(&self) -> Result<Vec<Redemption>> {
        self.with_lock(|dataset| dataset.redemptions())
    }

    #[inline]
    fn audit_log(&self) -> Result<Vec<AuditLogEntry>> {
        self.with_lock(|dataset| dataset.audit_log().to_vec())
    }

    #[inline]
    fn transaction<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        self.run_transaction(op)
    }

    #[inline]
    fn clear(&self) -> Result<()> {
        self.with_lock(|dataset| *dataset = Dataset::default())
    }
}

// ── Storage (async) implementation ──────────────────────────────────────

#[cfg(feature = "async")]
impl super::Storage for InMemoryStorage {
    #[inline]
    fn offers(&self) -> impl Future<Output = Result<Vec<Offer>>> + Send {
        future::ready(self.with_lock(|dataset| dataset.offers()))
    }

    #[inline]
    fn students(&self) -> impl Future<Output = Result<Vec<Student>>> + Send {
        future::ready(self.with_lock(|dataset| dataset.students()))
    }

    #[inline]
    fn merchants(&self) -> impl Future<Output = Result<Vec<Merchant>>> + Send {
        future::ready(self.with_lock(|dataset| dataset.merchants()))
    }

    #[inline]
    fn redemptions(&self) -> impl Future<Output = Result<Vec<Redemption>>> + Send {
        future::ready(self.with_lock(|dataset| dataset.redemptions()))
    }

    #[inline]
    fn audit_log(&self) -> impl Future<Output = Result<Vec<AuditLogEntry>>> + Send {
        future::ready(self.with_lock(|dataset| dataset.audit_log().to_vec()))
    }

    #[inline]
    fn transaction<R, F>(&self, op: F) -> impl Future<Output = Result<R>> + Send
    where
        R: Send,
        F: FnOnce(&mut Transaction<'_>) -> Result<R> + Send,
    {
        future::ready(self.run_transaction(op))
    }

    #[inline]
    fn clear(&self) -> impl Future<Output = Result<()>> + Send {
        future::ready(self.with_lock(|dataset| *dataset = Dataset::default()))
    }
}
