//! Redemption model and the snapshot shown to merchants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    MerchantId, Offer, OfferId, RedemptionId, RedemptionMethod, RedemptionStatus, Student,
    StudentId,
};

/// One student's claim on one offer.
///
/// At most one redemption exists per `(offer_id, student_id)` pair, and its
/// status moves from `Issued` to `Redeemed` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    /// Unique identifier.
    pub id: RedemptionId,
    /// Claimed offer.
    pub offer_id: OfferId,
    /// Claiming student.
    pub student_id: StudentId,
    /// Human-readable coupon code.
    pub coupon_code: String,
    /// Presentation method, copied from the offer at issuance.
    pub method: RedemptionMethod,
    /// Current state.
    pub status: RedemptionStatus,
    /// When the redemption was issued.
    pub issued_at: DateTime<Utc>,
    /// When the redemption was consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Merchant that consumed the redemption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<MerchantId>,
}

impl Redemption {
    /// Returns `true` once the redemption has been consumed.
    #[inline]
    #[must_use]
    pub fn is_redeemed(&self) -> bool {
        self.status == RedemptionStatus::Redeemed
    }
}

/// Merchant-facing view of a redemption, returned on successful
/// verification and carried by `AlreadyConsumed` errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionSnapshot {
    /// Redemption identifier.
    pub redemption_id: RedemptionId,
    /// Coupon code.
    pub coupon_code: String,
    /// Redemption state at the time of the snapshot.
    pub status: RedemptionStatus,
    /// Student display name.
    pub student_name: Option<String>,
    /// Student email.
    pub student_email: String,
    /// Offer title.
    pub offer_title: String,
    /// Offer discount in percent.
    pub discount_percent: u8,
    /// When the redemption was consumed.
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Merchant that consumed the redemption.
    pub verified_by: Option<MerchantId>,
}

impl RedemptionSnapshot {
    /// Assembles a snapshot from a redemption and its related records.
    #[inline]
    #[must_use]
    pub fn new(redemption: &Redemption, offer: &Offer, student: &Student) -> Self {
        Self {
            redemption_id: redemption.id.clone(),
            coupon_code: redemption.coupon_code.clone(),
            status: redemption.status,
            student_name: student.name.clone(),
            student_email: student.email.clone(),
            offer_title: offer.title.clone(),
            discount_percent: offer.discount_percent,
            redeemed_at: redemption.redeemed_at,
            verified_by: redemption.verified_by.clone(),
        }
    }

    /// Name to show for the student, falling back to a generic label.
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.student_name.as_deref().unwrap_or("Student")
    }
}
