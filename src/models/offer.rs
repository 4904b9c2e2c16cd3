//! Offer model and offer-creation input.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{MerchantId, OfferId, OfferStatus, RedemptionMethod};
use crate::error::{EduPerksError, Result};

/// Highest allowed discount percentage.
const MAX_DISCOUNT_PERCENT: u8 = 100;

/// Longest allowed validity window, in days.
const MAX_VALID_DAYS: u32 = 3_650;

/// A merchant-published discount with a validity window and optional
/// student cap.
///
/// `redemption_count` tracks issuance and `used_count` tracks in-store
/// consumption; both only ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    /// Unique identifier.
    pub id: OfferId,
    /// Owning merchant.
    pub merchant_id: MerchantId,
    /// Display title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Free-form category label.
    pub category: String,
    /// Discount in percent (0-100).
    pub discount_percent: u8,
    /// Where students are sent for online redemption.
    pub redirect_url: String,
    /// Lifecycle status.
    pub status: OfferStatus,
    /// Start of the validity window.
    pub start_at: DateTime<Utc>,
    /// End of the validity window.
    pub end_at: DateTime<Utc>,
    /// How issued redemptions are presented.
    pub redemption_type: RedemptionMethod,
    /// Maximum number of students; `0` means unlimited.
    #[serde(default)]
    pub student_cap: u32,
    /// Number of redemptions issued.
    #[serde(default)]
    pub redemption_count: u32,
    /// Number of redemptions consumed in store.
    #[serde(default)]
    pub used_count: u32,
    /// Static coupon code handed to every student instead of a generated
    /// one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_template: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Offer {
    /// Returns `true` if the offer has a student cap and it is reached.
    #[inline]
    #[must_use]
    pub const fn is_at_capacity(&self) -> bool {
        self.student_cap > 0 && self.redemption_count >= self.student_cap
    }

    /// Returns `true` if the offer's window ended before `now`.
    #[inline]
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_at < now
    }

    /// Returns `true` if the offer is `ACTIVE` and `now` lies inside its
    /// validity window.
    #[inline]
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Active && self.start_at <= now && now <= self.end_at
    }
}

/// Merchant-supplied fields for publishing a new offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOffer {
    /// Display title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Free-form category label.
    pub category: String,
    /// Discount in percent (0-100).
    pub discount_percent: u8,
    /// Where students are sent for online redemption.
    pub redirect_url: String,
    /// How issued redemptions are presented.
    pub redemption_type: RedemptionMethod,
    /// Maximum number of students; `0` means unlimited.
    #[serde(default)]
    pub student_cap: u32,
    /// Optional static coupon code.
    #[serde(default)]
    pub code_template: Option<String>,
    /// Validity window length; the default applies when absent.
    #[serde(default)]
    pub valid_for_days: Option<u32>,
}

impl NewOffer {
    /// Default validity window for new offers.
    pub const DEFAULT_VALID_DAYS: u32 = 30;

    /// Checks required fields and ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EduPerksError::InvalidInput`] if the redirect URL, title,
    /// description or category is blank, the discount exceeds 100 or the
    /// validity window is outside 1 to 3650 days.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.redirect_url.trim().is_empty() {
            return Err(EduPerksError::InvalidInput(
                "redirect URL is required".to_owned(),
            ));
        }
        if [&self.title, &self.description, &self.category]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(EduPerksError::InvalidInput(
                "missing required fields".to_owned(),
            ));
        }
        if self.discount_percent > MAX_DISCOUNT_PERCENT {
            return Err(EduPerksError::InvalidInput(format!(
                "discount must be between 0 and {MAX_DISCOUNT_PERCENT} percent"
            )));
        }
        if let Some(days) = self.valid_for_days
            && !(1..=MAX_VALID_DAYS).contains(&days)
        {
            return Err(EduPerksError::InvalidInput(format!(
                "validity window must be between 1 and {MAX_VALID_DAYS} days"
            )));
        }
        Ok(())
    }

    /// Builds an `ACTIVE` offer owned by `merchant_id`, valid from `now`.
    #[inline]
    #[must_use]
    pub fn into_offer(self, merchant_id: MerchantId, now: DateTime<Utc>) -> Offer {
        let days = self.valid_for_days.unwrap_or(Self::DEFAULT_VALID_DAYS);
        Offer {
            id: OfferId::generate(),
            merchant_id,
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            category: self.category.trim().to_owned(),
            discount_percent: self.discount_percent,
            redirect_url: self.redirect_url.trim().to_owned(),
            status: OfferStatus::Active,
            start_at: now,
            end_at: now
                .checked_add_signed(Duration::days(i64::from(days)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            redemption_type: self.redemption_type,
            student_cap: self.student_cap,
            redemption_count: 0,
            used_count: 0,
            code_template: self.code_template.filter(|code| !code.trim().is_empty()),
            created_at: now,
        }
    }
}
