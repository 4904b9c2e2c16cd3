//! Data models for marketplace entities.
//!
//! This module contains strongly-typed representations of offers,
//! students, merchants, redemptions and audit entries, newtype ID
//! wrappers, and enumeration types for constrained values.

mod audit;
mod enums;
mod identity;
mod ids;
mod merchant;
mod offer;
mod redemption;
mod student;

pub use audit::{AuditLogEntry, action};
pub use enums::{
    EntityKind, KycStatus, OfferStatus, RedemptionMethod, RedemptionStatus, Role,
    VerificationStatus,
};
pub use identity::{Identity, require_role};
pub use ids::{AuditLogId, MerchantId, OfferId, RedemptionId, StudentId, UserId};
pub use merchant::Merchant;
pub use offer::{NewOffer, Offer};
pub use redemption::{Redemption, RedemptionSnapshot};
pub use student::Student;
