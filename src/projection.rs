//! Read-only dashboard projections over committed records.
//!
//! These are plain functions of the record lists returned by a storage
//! backend; they never touch the ledger's invariants.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    AuditLogEntry, KycStatus, Merchant, MerchantId, Offer, OfferId, OfferStatus, Redemption,
    StudentId,
};

/// Issuance and usage counters of one offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferStats {
    /// Offer identifier.
    pub offer_id: OfferId,
    /// Offer title.
    pub title: String,
    /// Student cap; `0` means unlimited.
    pub student_cap: u32,
    /// Redemptions issued.
    pub issued: u32,
    /// Redemptions consumed in store.
    pub used: u32,
}

impl OfferStats {
    /// Counters of `offer`.
    #[inline]
    #[must_use]
    pub fn of(offer: &Offer) -> Self {
        Self {
            offer_id: offer.id.clone(),
            title: offer.title.clone(),
            student_cap: offer.student_cap,
            issued: offer.redemption_count,
            used: offer.used_count,
        }
    }

    /// Issued redemptions not yet consumed.
    #[inline]
    #[must_use]
    pub const fn outstanding(&self) -> u32 {
        self.issued.saturating_sub(self.used)
    }

    /// Places left before the cap is reached; `None` for uncapped offers.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> Option<u32> {
        if self.student_cap == 0 {
            None
        } else {
            Some(self.student_cap.saturating_sub(self.issued))
        }
    }
}

/// A redemption of one of a merchant's offers, with the offer title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantRedemption {
    /// The redemption.
    pub redemption: Redemption,
    /// Title of the redeemed offer.
    pub offer_title: String,
}

/// A live offer as students see it, with the merchant's trade name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferListing {
    /// The offer.
    pub offer: Offer,
    /// Trade name of the owning merchant, or its ID if the profile is
    /// missing.
    pub merchant_name: String,
}

/// Work waiting for an admin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueue {
    /// Offers still in `DRAFT`, oldest first.
    pub draft_offers: Vec<Offer>,
    /// Merchants whose KYC is pending.
    pub pending_merchants: Vec<Merchant>,
}

impl ReviewQueue {
    /// Whether nothing is waiting for review.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draft_offers.is_empty() && self.pending_merchants.is_empty()
    }
}

/// Offers that are `ACTIVE` and inside their window at `now`, newest
/// first.
#[inline]
#[must_use]
pub fn active_offers(offers: Vec<Offer>, now: DateTime<Utc>) -> Vec<Offer> {
    let mut live: Vec<Offer> = offers
        .into_iter()
        .filter(|offer| offer.is_live(now))
        .collect();
    live.sort_by(|left, right| right.created_at.cmp(&left.created_at));
    live
}

/// [`active_offers`] joined with the trade names of their merchants.
#[inline]
#[must_use]
pub fn offer_listings(
    offers: Vec<Offer>,
    merchants: &[Merchant],
    now: DateTime<Utc>,
) -> Vec<OfferListing> {
    active_offers(offers, now)
        .into_iter()
        .map(|offer| {
            let merchant_name = merchants
                .iter()
                .find(|merchant| merchant.id == offer.merchant_id)
                .map_or_else(
                    || offer.merchant_id.to_string(),
                    |merchant| merchant.trade_name.clone(),
                );
            OfferListing {
                offer,
                merchant_name,
            }
        })
        .collect()
}

/// Draft offers and merchants with pending KYC.
#[inline]
#[must_use]
pub fn review_queue(offers: Vec<Offer>, merchants: Vec<Merchant>) -> ReviewQueue {
    let mut draft_offers: Vec<Offer> = offers
        .into_iter()
        .filter(|offer| offer.status == OfferStatus::Draft)
        .collect();
    draft_offers.sort_by(|left, right| left.created_at.cmp(&right.created_at));
    ReviewQueue {
        draft_offers,
        pending_merchants: merchants
            .into_iter()
            .filter(|merchant| merchant.kyc_status == KycStatus::Pending)
            .collect(),
    }
}

/// Redemptions of offers owned by `merchant_id`, newest first.
#[inline]
#[must_use]
pub fn merchant_redemptions(
    merchant_id: &MerchantId,
    offers: &[Offer],
    redemptions: Vec<Redemption>,
) -> Vec<MerchantRedemption> {
    let mut rows: Vec<MerchantRedemption> = redemptions
        .into_iter()
        .filter_map(|redemption| {
            offers
                .iter()
                .find(|offer| offer.id == redemption.offer_id && offer.merchant_id == *merchant_id)
                .map(|offer| MerchantRedemption {
                    offer_title: offer.title.clone(),
                    redemption,
                })
        })
        .collect();
    rows.sort_by(|left, right| right.redemption.issued_at.cmp(&left.redemption.issued_at));
    rows
}

/// Redemptions held by `student_id`, newest first.
#[inline]
#[must_use]
pub fn student_redemptions(student_id: &StudentId, redemptions: Vec<Redemption>) -> Vec<Redemption> {
    let mut held: Vec<Redemption> = redemptions
        .into_iter()
        .filter(|redemption| redemption.student_id == *student_id)
        .collect();
    held.sort_by(|left, right| right.issued_at.cmp(&left.issued_at));
    held
}

/// Audit entries about `entity_id`, in append order.
#[inline]
#[must_use]
pub fn audit_trail(entries: Vec<AuditLogEntry>, entity_id: &str) -> Vec<AuditLogEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.entity_id == entity_id)
        .collect()
}
