//! Invariant-enforcing operations over a storage [`Transaction`].
//!
//! Every function here runs inside one unit of work: it reads what it
//! needs, checks preconditions, and stages all of its writes (record
//! changes, counter increments, audit entries) on the transaction. The
//! storage backend commits them together or not at all.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use tracing::debug;

use crate::coupon;
use crate::error::{EduPerksError, Result};
use crate::models::{
    AuditLogEntry, EntityKind, KycStatus, Merchant, MerchantId, NewOffer, Offer, OfferId,
    OfferStatus, Redemption, RedemptionId, RedemptionMethod, RedemptionSnapshot,
    RedemptionStatus, Student, StudentId, UserId, VerificationStatus, action,
};
use crate::storage::Transaction;
use crate::token;

/// Result of [`issue_redemption`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuance {
    /// The student's redemption, new or pre-existing.
    pub redemption: Redemption,
    /// QR token for the redemption; present only for QR offers.
    pub token: Option<String>,
    /// `false` when an earlier redemption for the pair was returned.
    pub newly_issued: bool,
}

/// Issues the redemption of `offer_id` for `student_id`, or returns the
/// existing one.
///
/// A repeated call for the same pair returns the first redemption and
/// changes nothing. A first call on a capped offer that is full fails;
/// otherwise it stages the redemption, the offer's issuance counter
/// increment and a `REDEMPTION_CREATE` audit entry.
///
/// # Errors
///
/// Returns [`EduPerksError::NotFound`] for an unknown offer or student,
/// [`EduPerksError::NotActive`] if the offer is not `ACTIVE`,
/// [`EduPerksError::CapacityExceeded`] if a capped offer is full, and
/// [`EduPerksError::Serialization`] if the QR token cannot be built.
#[inline]
pub fn issue_redemption<R: Rng + ?Sized>(
    tx: &mut Transaction<'_>,
    rng: &mut R,
    code_prefix: &str,
    offer_id: &OfferId,
    student_id: &StudentId,
    now: DateTime<Utc>,
) -> Result<Issuance> {
    let offer = tx
        .offer(offer_id)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Offer, offer_id))?;
    if offer.status != OfferStatus::Active {
        debug!(offer = %offer_id, status = %offer.status, "offer not active");
        return Err(EduPerksError::NotActive {
            status: offer.status,
        });
    }
    let student_user = tx
        .student(student_id)
        .map(|student| student.user_id.clone())
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Student, student_id))?;

    if let Some(existing) = tx.redemption_for(offer_id, student_id) {
        debug!(redemption = %existing.id, "returning existing redemption");
        let redemption = existing.clone();
        return Ok(Issuance {
            token: qr_token(&redemption)?,
            redemption,
            newly_issued: false,
        });
    }

    if offer.is_at_capacity() {
        debug!(offer = %offer_id, cap = offer.student_cap, "offer at capacity");
        return Err(EduPerksError::CapacityExceeded {
            cap: offer.student_cap,
        });
    }

    let redemption = Redemption {
        id: RedemptionId::generate(),
        offer_id: offer_id.clone(),
        student_id: student_id.clone(),
        coupon_code: coupon::code_for(rng, code_prefix, &offer, student_id),
        method: offer.redemption_type,
        status: RedemptionStatus::Issued,
        issued_at: now,
        redeemed_at: None,
        verified_by: None,
    };
    let token = qr_token(&redemption)?;

    let mut counted = offer;
    counted.redemption_count = increment(counted.redemption_count, "redemption count")?;
    tx.put_offer(counted);
    tx.put_redemption(redemption.clone())?;
    tx.append_audit(AuditLogEntry::new(
        Some(student_user),
        EntityKind::Redemption,
        &redemption.id,
        action::REDEMPTION_CREATE,
        json!({
            "offerId": offer_id,
            "studentId": student_id,
            "method": redemption.method,
        }),
        now,
    ));
    debug!(redemption = %redemption.id, "redemption staged");

    Ok(Issuance {
        redemption,
        token,
        newly_issued: true,
    })
}

/// Consumes the redemption identified by `token` on behalf of
/// `merchant_id`.
///
/// On success stages the `ISSUED` to `REDEEMED` transition, the offer's
/// usage counter increment and a `QR_VERIFIED` audit entry, and returns
/// the post-consumption snapshot.
///
/// # Errors
///
/// Propagates [`token::decode`] failures unchanged. Returns
/// [`EduPerksError::NotFound`] for an unknown redemption, offer or
/// student, [`EduPerksError::TamperedToken`] if the token names a
/// different offer than the redemption, [`EduPerksError::Forbidden`] if
/// the offer belongs to another merchant,
/// [`EduPerksError::AlreadyConsumed`] (with the prior-use snapshot) if the
/// redemption was consumed before, and [`EduPerksError::Expired`] if the
/// offer ended before `now`.
#[inline]
pub fn consume_redemption(
    tx: &mut Transaction<'_>,
    token: &str,
    merchant_id: &MerchantId,
    now: DateTime<Utc>,
) -> Result<RedemptionSnapshot> {
    let payload = token::decode(token)?;

    let redemption = tx
        .redemption(&payload.rid)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Redemption, &payload.rid))?;
    if redemption.offer_id != payload.oid {
        debug!(redemption = %redemption.id, "token offer does not match redemption");
        return Err(EduPerksError::TamperedToken);
    }
    let offer = tx
        .offer(&redemption.offer_id)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Offer, &redemption.offer_id))?;
    if offer.merchant_id != *merchant_id {
        return Err(EduPerksError::Forbidden(
            "offer does not belong to your store".to_owned(),
        ));
    }
    let student = tx
        .student(&redemption.student_id)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Student, &redemption.student_id))?;

    if redemption.is_redeemed() {
        return Err(EduPerksError::AlreadyConsumed(Box::new(
            RedemptionSnapshot::new(&redemption, &offer, &student),
        )));
    }
    if offer.has_ended(now) {
        return Err(EduPerksError::Expired {
            ended_at: offer.end_at,
        });
    }

    let actor = tx.merchant(merchant_id).map(|merchant| merchant.user_id.clone());

    let mut consumed = redemption;
    consumed.status = RedemptionStatus::Redeemed;
    consumed.redeemed_at = Some(now);
    consumed.verified_by = Some(merchant_id.clone());

    let mut counted = offer;
    counted.used_count = increment(counted.used_count, "used count")?;

    let snapshot = RedemptionSnapshot::new(&consumed, &counted, &student);
    tx.append_audit(AuditLogEntry::new(
        actor,
        EntityKind::Redemption,
        &consumed.id,
        action::QR_VERIFIED,
        json!({
            "offerId": counted.id,
            "merchantId": merchant_id,
            "studentId": consumed.student_id,
            "verifiedAt": now,
        }),
        now,
    ));
    tx.put_redemption(consumed)?;
    tx.put_offer(counted);
    debug!(redemption = %snapshot.redemption_id, "consumption staged");

    Ok(snapshot)
}

/// Publishes a new offer for `merchant_id`.
///
/// # Errors
///
/// Returns [`EduPerksError::NotFound`] for an unknown merchant,
/// [`EduPerksError::Forbidden`] if the merchant is not KYC-approved and
/// [`EduPerksError::InvalidInput`] if `input` fails validation.
#[inline]
pub fn create_offer(
    tx: &mut Transaction<'_>,
    merchant_id: &MerchantId,
    input: NewOffer,
    now: DateTime<Utc>,
) -> Result<Offer> {
    let merchant = tx
        .merchant(merchant_id)
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Merchant, merchant_id))?;
    if !merchant.is_approved() {
        return Err(EduPerksError::Forbidden(
            "merchant account is not approved".to_owned(),
        ));
    }
    let actor = merchant.user_id.clone();
    input.validate()?;

    let offer = input.into_offer(merchant_id.clone(), now);
    tx.append_audit(AuditLogEntry::new(
        Some(actor),
        EntityKind::Offer,
        &offer.id,
        action::OFFER_CREATE,
        json!({
            "merchantId": merchant_id,
            "title": offer.title,
            "discountPercent": offer.discount_percent,
            "endAt": offer.end_at,
        }),
        now,
    ));
    tx.put_offer(offer.clone());
    Ok(offer)
}

/// Marks a merchant's KYC as approved. Approving an approved merchant
/// changes nothing.
///
/// # Errors
///
/// Returns [`EduPerksError::NotFound`] for an unknown merchant.
#[inline]
pub fn approve_merchant(
    tx: &mut Transaction<'_>,
    actor: &UserId,
    merchant_id: &MerchantId,
    now: DateTime<Utc>,
) -> Result<Merchant> {
    let mut merchant = tx
        .merchant(merchant_id)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Merchant, merchant_id))?;
    if merchant.is_approved() {
        return Ok(merchant);
    }
    let previous = merchant.kyc_status;
    merchant.kyc_status = KycStatus::Approved;
    tx.append_audit(AuditLogEntry::new(
        Some(actor.clone()),
        EntityKind::Merchant,
        merchant_id,
        action::MERCHANT_APPROVED,
        json!({ "from": previous, "to": merchant.kyc_status }),
        now,
    ));
    tx.put_merchant(merchant.clone())?;
    Ok(merchant)
}

/// Changes an offer's lifecycle status.
///
/// # Errors
///
/// Returns [`EduPerksError::NotFound`] for an unknown offer.
#[inline]
pub fn set_offer_status(
    tx: &mut Transaction<'_>,
    actor: &UserId,
    offer_id: &OfferId,
    status: OfferStatus,
    now: DateTime<Utc>,
) -> Result<Offer> {
    let mut offer = tx
        .offer(offer_id)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Offer, offer_id))?;
    if offer.status == status {
        return Ok(offer);
    }
    let previous = offer.status;
    offer.status = status;
    tx.append_audit(AuditLogEntry::new(
        Some(actor.clone()),
        EntityKind::Offer,
        offer_id,
        action::OFFER_STATUS,
        json!({ "from": previous, "to": status }),
        now,
    ));
    tx.put_offer(offer.clone());
    Ok(offer)
}

/// Marks a student's email as verified. Verification is one-way; a
/// verified student is returned unchanged.
///
/// # Errors
///
/// Returns [`EduPerksError::NotFound`] for an unknown student.
#[inline]
pub fn verify_student(
    tx: &mut Transaction<'_>,
    actor: Option<UserId>,
    student_id: &StudentId,
    now: DateTime<Utc>,
) -> Result<Student> {
    let mut student = tx
        .student(student_id)
        .cloned()
        .ok_or_else(|| EduPerksError::not_found(EntityKind::Student, student_id))?;
    if student.is_verified() {
        return Ok(student);
    }
    student.verification_status = VerificationStatus::Verified;
    tx.append_audit(AuditLogEntry::new(
        actor,
        EntityKind::Student,
        student_id,
        action::STUDENT_VERIFIED,
        json!({ "email": student.email }),
        now,
    ));
    tx.put_student(student.clone())?;
    Ok(student)
}

/// Stores an offer record, keeping the counters of a stored offer with the
/// same ID.
///
/// # Errors
///
/// Returns [`EduPerksError::InvalidInput`] if the new cap is below the
/// number of redemptions already issued.
#[inline]
pub fn register_offer(tx: &mut Transaction<'_>, offer: Offer) -> Result<Offer> {
    let mut offer = offer;
    if let Some(stored) = tx.offer(&offer.id) {
        if offer.student_cap > 0 && offer.student_cap < stored.redemption_count {
            return Err(EduPerksError::InvalidInput(format!(
                "student cap {} is below the {} redemptions already issued",
                offer.student_cap, stored.redemption_count
            )));
        }
        offer.redemption_count = stored.redemption_count;
        offer.used_count = stored.used_count;
    }
    tx.put_offer(offer.clone());
    Ok(offer)
}

/// Stores a student record. A verified student stays verified.
///
/// # Errors
///
/// Returns [`EduPerksError::Storage`] if another student profile belongs
/// to the same user.
#[inline]
pub fn register_student(tx: &mut Transaction<'_>, student: Student) -> Result<Student> {
    let mut student = student;
    if tx.student(&student.id).is_some_and(Student::is_verified) {
        student.verification_status = VerificationStatus::Verified;
    }
    tx.put_student(student.clone())?;
    Ok(student)
}

/// Stores a merchant record, keeping the KYC status of a stored merchant
/// with the same ID. KYC only changes through [`approve_merchant`].
///
/// # Errors
///
/// Returns [`EduPerksError::Storage`] if another merchant profile belongs
/// to the same user.
#[inline]
pub fn register_merchant(tx: &mut Transaction<'_>, merchant: Merchant) -> Result<Merchant> {
    let mut merchant = merchant;
    if let Some(stored) = tx.merchant(&merchant.id) {
        merchant.kyc_status = stored.kyc_status;
    }
    tx.put_merchant(merchant.clone())?;
    Ok(merchant)
}

/// QR token for QR redemptions, `None` for the other methods.
fn qr_token(redemption: &Redemption) -> Result<Option<String>> {
    if redemption.method == RedemptionMethod::Qr {
        token::for_redemption(redemption).map(Some)
    } else {
        Ok(None)
    }
}

/// Adds one to a monotonic counter.
fn increment(value: u32, counter: &str) -> Result<u32> {
    value
        .checked_add(1)
        .ok_or_else(|| EduPerksError::Storage(format!("{counter} overflow").into()))
}
