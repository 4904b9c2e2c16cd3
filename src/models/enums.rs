//! Enumeration types for constrained entity values.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    /// Being prepared by the merchant; not redeemable.
    Draft,
    /// Published and redeemable.
    Active,
    /// Withdrawn or past its window.
    Expired,
}

/// How a redemption is presented to the merchant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionMethod {
    /// Coupon code typed at checkout.
    Code,
    /// QR token scanned in store.
    Qr,
    /// Redirect link to the merchant's site.
    Link,
}

/// State of a redemption. `Redeemed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    /// Issued to the student, not yet used.
    Issued,
    /// Consumed by the merchant.
    Redeemed,
}

/// Email verification state of a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Awaiting email verification.
    Pending,
    /// Verified; may redeem offers.
    Verified,
}

/// KYC review state of a merchant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    /// Submitted, awaiting admin review.
    Pending,
    /// Approved; may publish offers and verify redemptions.
    Approved,
    /// Rejected by an admin.
    Rejected,
}

/// Role attached to an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Student browsing and redeeming offers.
    Student,
    /// Merchant publishing offers and verifying redemptions.
    Merchant,
    /// Platform administrator.
    Admin,
}

/// Kind of entity, used in not-found errors and audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// An offer.
    Offer,
    /// A student profile.
    Student,
    /// A merchant profile.
    Merchant,
    /// A redemption.
    Redemption,
}

/// Implements `Display` using a fixed lowercase label per variant.
macro_rules! display_labels {
    ($ty:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl core::fmt::Display for $ty {
            #[inline]
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(match *self {
                    $(Self::$variant => $label,)+
                })
            }
        }
    };
}

display_labels!(OfferStatus { Draft => "draft", Active => "active", Expired => "expired" });
display_labels!(RedemptionMethod { Code => "code", Qr => "qr", Link => "link" });
display_labels!(RedemptionStatus { Issued => "issued", Redeemed => "redeemed" });
display_labels!(VerificationStatus { Pending => "pending", Verified => "verified" });
display_labels!(KycStatus { Pending => "pending", Approved => "approved", Rejected => "rejected" });
display_labels!(Role { Student => "student", Merchant => "merchant", Admin => "admin" });
display_labels!(EntityKind {
    Offer => "offer",
    Student => "student",
    Merchant => "merchant",
    Redemption => "redemption",
});

impl core::str::FromStr for Role {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "merchant" => Ok(Self::Merchant),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
