//! JSON-file-based storage backend.
//!
//! Stores every record in a single JSON document under a configurable
//! directory (default: `$XDG_DATA_HOME/edu-perks/`).

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "async")]
use core::future::Future;

use super::{Dataset, Transaction};
use crate::error::{EduPerksError, Result};
#[cfg(any(feature = "async", feature = "blocking"))]
use crate::models::{AuditLogEntry, Merchant, Offer, Redemption, Student};

/// Application name used for the XDG data directory.
const APP_NAME: &str = "edu-perks";

/// File holding all records.
const LEDGER_FILE: &str = "ledger.json";
/// Scratch file written before the atomic rename onto [`LEDGER_FILE`].
const LEDGER_TMP_FILE: &str = "ledger.json.tmp";
/// Sentinel file used for cross-process file locking.
const LOCK_FILE: &str = "storage.lock";

/// File-backed storage that persists records as one JSON document.
///
/// Keeping offers, students, merchants, redemptions and the audit trail in
/// one file lets a transaction commit with a single rename, so a redemption
/// never lands on disk without its counter increment and audit entry.
///
/// # Concurrency
///
/// Thread safety within a single process is provided by an in-process
/// [`Mutex`]. Cross-process safety is achieved via an advisory file lock
/// on `storage.lock` (using [`std::fs::File::lock`] /
/// [`std::fs::File::lock_shared`]).
///
/// Read operations acquire a shared lock (allowing concurrent readers),
/// while transactions acquire an exclusive lock for the whole
/// read-check-write sequence.
///
/// # File layout
///
/// ```text
/// <dir>/
///   storage.lock          (cross-process lock sentinel)
///   ledger.json
/// ```
#[derive(Debug)]
pub struct FileStorage {
    /// Root directory containing the ledger file.
    dir: PathBuf,
    /// Mutex serializing concurrent in-process access.
    lock: Mutex<()>,
    /// Sentinel file for cross-process advisory locking.
    lock_file: fs::File,
}

impl FileStorage {
    /// Creates a new file storage rooted at the given directory.
    ///
    /// Creates the directory (and parents) if it does not exist. Also
    /// opens (or creates) the `storage.lock` sentinel file used for
    /// cross-process advisory locking.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the lock
    /// file cannot be opened.
    #[inline]
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(storage_io_error)?;
        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(storage_io_error)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
            lock_file,
        })
    }

    /// Returns the default XDG-compliant data directory for this application.
    ///
    /// On Linux: `$XDG_DATA_HOME/edu-perks/` (typically
    /// `~/.local/share/edu-perks/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the platform data directory cannot be determined.
    #[inline]
    pub fn default_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|data_path| data_path.join(APP_NAME))
            .ok_or_else(|| {
                EduPerksError::Storage("could not determine platform data directory".into())
            })
    }

    // ── Private helpers ─────────────────────────────────────────────

    /// Returns the full path for a given file name.
    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Acquires an in-process mutex guard and a shared (read) file lock,
    /// executes `op`, then releases the file lock.
    fn with_shared_lock<R, F: FnOnce() -> Result<R>>(&self, op: F) -> Result<R> {
        let _guard: MutexGuard<'_, ()> = self.lock.lock().map_err(|err| lock_poison_error(&err))?;
        self.lock_file.lock_shared().map_err(storage_io_error)?;
        let result = op();
        // Only surface the unlock error when the operation succeeded;
        // otherwise the original error is more useful.
        if let Err(err) = self.lock_file.unlock()
            && result.is_ok()
        {
            return Err(storage_io_error(err));
        }
        result
    }

    /// Acquires an in-process mutex guard and an exclusive (write) file
    /// lock, executes `op`, then releases the file lock.
    fn with_exclusive_lock<R, F: FnOnce() -> Result<R>>(&self, op: F) -> Result<R> {
        let _guard: MutexGuard<'_, ()> = self.lock.lock().map_err(|err| lock_poison_error(&err))?;
        self.lock_file.lock().map_err(storage_io_error)?;
        let result = op();
        if let Err(err) = self.lock_file.unlock()
            && result.is_ok()
        {
            return Err(storage_io_error(err));
        }
        result
    }

    /// Reads and deserializes the ledger. Returns an empty dataset if the
    /// file does not exist.
    fn read_dataset(&self) -> Result<Dataset> {
        match fs::read_to_string(self.path(LEDGER_FILE)) {
            Ok(contents) => serde_json::from_str(&contents).map_err(EduPerksError::from),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Dataset::new()),
            Err(err) => Err(storage_io_error(err)),
        }
    }

    /// Atomically writes the ledger (write-to-tmp then rename).
    fn write_dataset(&self, dataset: &Dataset) -> Result<()> {
        let tmp_path = self.path(LEDGER_TMP_FILE);
        let json = serde_json::to_string_pretty(dataset).map_err(EduPerksError::from)?;
        fs::write(&tmp_path, json).map_err(storage_io_error)?;
        fs::rename(&tmp_path, self.path(LEDGER_FILE)).map_err(storage_io_error)?;
        Ok(())
    }

    /// Reads the ledger under a shared lock and projects it.
    fn read_with<R, F: FnOnce(&Dataset) -> R>(&self, project: F) -> Result<R> {
        self.with_shared_lock(|| {
            let dataset = self.read_dataset()?;
            Ok(project(&dataset))
        })
    }

    /// Loads the ledger under an exclusive lock, runs `op` and writes the
    /// result back if `op` succeeded and staged anything.
    fn run_transaction<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        self.with_exclusive_lock(|| {
            let mut dataset = self.read_dataset()?;
            let mut tx = dataset.transaction();
            let output = op(&mut tx)?;
            let changes = tx.into_changes();
            if !changes.is_empty() {
                dataset.apply(changes);
                self.write_dataset(&dataset)?;
            }
            Ok(output)
        })
    }

    /// Deletes the ledger file.
    ///
    /// The `storage.lock` sentinel is intentionally preserved: it is
    /// infrastructure, not data.
    fn clear_all(&self) -> Result<()> {
        self.with_exclusive_lock(|| match fs::remove_file(self.path(LEDGER_FILE)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_io_error(err)),
        })
    }
}

// ── Free-standing helpers ───────────────────────────────────────────────

/// Wraps an I/O error into a [`EduPerksError::Storage`].
fn storage_io_error(err: std::io::Error) -> EduPerksError {
    EduPerksError::Storage(Box::new(err))
}

/// Wraps a mutex poison error into a [`EduPerksError::Storage`].
fn lock_poison_error<T>(err: &std::sync::PoisonError<T>) -> EduPerksError {
    EduPerksError::Storage(err.to_string().into())
}

// ── BlockingStorage implementation ──────────────────────────────────────

#[cfg(feature = "blocking")]
impl super::BlockingStorage for FileStorage {
    #[inline]
    fn offers(&self) -> Result<Vec<Offer>> {
        self.read_with(Dataset::offers)
    }

    #[inline]
    fn students(&self) -> Result<Vec<Student>> {
        self.read_with(Dataset::students)
    }

    #[inline]
    fn merchants(&self) -> Result<Vec<Merchant>> {
        self.read_with(Dataset::merchants)
    }

    #[inline]
    fn redemptions(&self) -> Result<Vec<Redemption>> {
        self.read_with(Dataset::redemptions)
    }

    #[inline]
    fn audit_log(&self) -> Result<Vec<AuditLogEntry>> {
        self.read_with(|dataset| dataset.audit_log().to_vec())
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
        self.clear_all()
    }
}

// ── Storage (async) implementation ──────────────────────────────────────

#[cfg(feature = "async")]
impl super::Storage for FileStorage {
    #[inline]
    fn offers(&self) -> impl Future<Output = Result<Vec<Offer>>> + Send {
        core::future::ready(self.read_with(Dataset::offers))
    }

    #[inline]
    fn students(&self) -> impl Future<Output = Result<Vec<Student>>> + Send {
        core::future::ready(self.read_with(Dataset::students))
    }

    #[inline]
    fn merchants(&self) -> impl Future<Output = Result<Vec<Merchant>>> + Send {
        core::future::ready(self.read_with(Dataset::merchants))
    }

    #[inline]
    fn redemptions(&self) -> impl Future<Output = Result<Vec<Redemption>>> + Send {
        core::future::ready(self.read_with(Dataset::redemptions))
    }

    #[inline]
    fn audit_log(&self) -> impl Future<Output = Result<Vec<AuditLogEntry>>> + Send {
        core::future::ready(self.read_with(|dataset| dataset.audit_log().to_vec()))
    }

    #[inline]
    fn transaction<R, F>(&self, op: F) -> impl Future<Output = Result<R>> + Send
    where
        R: Send,
        F: FnOnce(&mut Transaction<'_>) -> Result<R> + Send,
    {
        core::future::ready(self.run_transaction(op))
    }

    #[inline]
    fn clear(&self) -> impl Future<Output = Result<()>> + Send {
        core::future::ready(self.clear_all())
    }
}
