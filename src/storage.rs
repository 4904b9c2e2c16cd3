//! Pluggable storage backends for marketplace records.
//!
//! This module defines the [`Storage`] (async) and [`BlockingStorage`]
//! (blocking) traits via a shared macro, mirroring the facade generation
//! pattern in [`crate::marketplace`].
//!
//! Reads return committed records. Every write goes through
//! `transaction`, which hands the caller a [`Transaction`] over a
//! consistent view of the store and commits its staged writes only when
//! the closure returns `Ok`.

mod dataset;
#[cfg(feature = "storage-file")]
mod file;
mod memory;

pub use dataset::{Changes, Dataset, Transaction};
#[cfg(feature = "storage-file")]
pub use file::FileStorage;
pub use memory::InMemoryStorage;

/// Generates a storage trait (async or blocking) with all entity methods.
///
/// Uses `@methods` to define the method list once, and `@method` to render
/// each method in async (`impl Future + Send`) or blocking (`fn`) style.
/// The generic unit-of-work method has its own `@transaction` renderer.
macro_rules! define_storage {
    // ── Entry points ────────────────────────────────────────────────
    (
        trait_name: $trait_name:ident,
        trait_doc: $trait_doc:expr,
        mode: async_mode,
    ) => {
        #[doc = $trait_doc]
        pub trait $trait_name: core::fmt::Debug + Send + Sync {
            define_storage!(@methods async_mode);
        }
    };
    (
        trait_name: $trait_name:ident,
        trait_doc: $trait_doc:expr,
        mode: blocking,
    ) => {
        #[doc = $trait_doc]
        pub trait $trait_name: core::fmt::Debug + Send + Sync {
            define_storage!(@methods blocking);
        }
    };

    // ── Single method list (shared between both variants) ───────────
    (@methods $mode:ident) => {
        // Read
        define_storage!(@method $mode, offers,
            "Returns all stored offers, oldest first.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Offer>>);
        define_storage!(@method $mode, students,
            "Returns all stored students.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Student>>);
        define_storage!(@method $mode, merchants,
            "Returns all stored merchants.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Merchant>>);
        define_storage!(@method $mode, redemptions,
            "Returns all stored redemptions, oldest first.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<Redemption>>);
        define_storage!(@method $mode, audit_log,
            "Returns the audit trail in append order.\n\n# Errors\n\nReturns an error if the storage backend fails to read.",
            -> Result<Vec<AuditLogEntry>>);

        // Write
        define_storage!(@transaction $mode);

        // Clear
        define_storage!(@method $mode, clear,
            "Removes all stored records.\n\n# Errors\n\nReturns an error if the storage backend fails to write.",
            -> Result<()>);
    };

    // ── Blocking method renderer ────────────────────────────────────
    (@method blocking, $name:ident, $doc:expr,
     $($param:ident: $param_ty:ty,)* -> $ret:ty) => {
        #[doc = $doc]
        fn $name(&self $(, $param: $param_ty)*) -> $ret;
    };

    // ── Async method renderer (returns impl Future + Send) ──────────
    (@method async_mode, $name:ident, $doc:expr,
     $($param:ident: $param_ty:ty,)* -> $ret:ty) => {
        #[doc = $doc]
        fn $name(&self $(, $param: $param_ty)*)
            -> impl core::future::Future<Output = $ret> + Send;
    };

    // ── Unit of work ────────────────────────────────────────────────
    (@transaction blocking) => {
        /// Runs `op` as one atomic unit of work.
        ///
        /// `op` sees committed records plus its own staged writes, and no
        /// other transaction runs concurrently on the same store. Staged
        /// writes are committed together when `op` returns `Ok` and
        /// discarded when it returns `Err`.
        ///
        /// # Errors
        ///
        /// Returns the error produced by `op`, or an error if the storage
        /// backend fails to read or commit.
        fn transaction<R, F>(&self, op: F) -> Result<R>
        where
            F: FnOnce(&mut Transaction<'_>) -> Result<R>;
    };
    (@transaction async_mode) => {
        /// Runs `op` as one atomic unit of work.
        ///
        /// `op` sees committed records plus its own staged writes, and no
        /// other transaction runs concurrently on the same store. Staged
        /// writes are committed together when `op` returns `Ok` and
        /// discarded when it returns `Err`.
        ///
        /// # Errors
        ///
        /// Returns the error produced by `op`, or an error if the storage
        /// backend fails to read or commit.
        fn transaction<R, F>(&self, op: F) -> impl core::future::Future<Output = Result<R>> + Send
        where
            R: Send,
            F: FnOnce(&mut Transaction<'_>) -> Result<R> + Send;
    };
}

#[cfg(feature = "async")]
mod async_storage {
    //! Async storage trait definition.

    use super::Transaction;
    use crate::error::Result;
    use crate::models::{AuditLogEntry, Merchant, Offer, Redemption, Student};

    define_storage! {
        trait_name: Storage,
        trait_doc: "Async storage backend for marketplace records.\n\nAll methods take `&self`; implementations use interior mutability\n(e.g. `Mutex`) for thread-safe mutation.",
        mode: async_mode,
    }
}

#[cfg(feature = "blocking")]
mod blocking_storage {
    //! Blocking storage trait definition.

    use super::Transaction;
    use crate::error::Result;
    use crate::models::{AuditLogEntry, Merchant, Offer, Redemption, Student};

    define_storage! {
        trait_name: BlockingStorage,
        trait_doc: "Blocking storage backend for marketplace records.\n\nAll methods take `&self`; implementations use interior mutability\n(e.g. `Mutex`) for thread-safe mutation.",
        mode: blocking,
    }
}

#[cfg(feature = "async")]
pub use async_storage::Storage;
#[cfg(feature = "blocking")]
pub use blocking_storage::BlockingStorage;
