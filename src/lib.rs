//! Redemption core of a student discount marketplace.
//!
//! Verified students claim merchant offers; each claim yields one coupon
//! code per (offer, student) pair and, for QR offers, a tamper-evident
//! token that the merchant scans and consumes exactly once in store.
//!
//! The [`marketplace`] facade is the usual entry point. It runs every
//! state change as one transaction against a [`storage`] backend.
//!
//! ```
//! # #[cfg(feature = "blocking")]
//! # fn main() -> edu_perks::error::Result<()> {
//! use edu_perks::marketplace::MarketplaceBlocking;
//! use edu_perks::storage::InMemoryStorage;
//!
//! let market = MarketplaceBlocking::builder()
//!     .storage(InMemoryStorage::new())
//!     .build()?;
//! assert!(market.active_offers()?.is_empty());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "blocking"))]
//! # fn main() {}
//! ```

pub mod coupon;
pub mod error;
pub mod ledger;
pub mod marketplace;
pub mod models;
pub mod projection;
pub mod storage;
pub mod token;
pub mod verification;
