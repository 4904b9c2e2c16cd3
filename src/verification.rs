//! Merchant-side verification: caller authorization, reduction of scan
//! inputs to a token string, and outcome logging.
//!
//! A camera frame, an uploaded picture and pasted text all end up as the
//! same token string handed to [`crate::ledger::consume_redemption`].
//! Image decoding is a pure function of the image bytes and shares no
//! state with the ledger.

use core::fmt::Debug;

use tracing::{info, warn};

use crate::error::{EduPerksError, Result};
use crate::models::{Identity, Merchant, MerchantId, RedemptionSnapshot, Role, require_role};
use crate::storage::Transaction;

/// Extracts QR payload text from an image.
///
/// Implementations wrap an external QR library. They must be pure: the
/// same bytes always yield the same answer.
pub trait QrDecoder: Debug + Send + Sync {
    /// Returns the text of the first QR symbol found in `image`, or `None`
    /// if there is none.
    fn decode(&self, image: &[u8]) -> Option<String>;
}

/// Decoder that never finds a QR symbol. Used when no image library is
/// configured; only [`ScanInput::Manual`] input can succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQrDecoder;

impl QrDecoder for NoQrDecoder {
    #[inline]
    fn decode(&self, _image: &[u8]) -> Option<String> {
        None
    }
}

/// One attempt to present a token to a merchant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanInput {
    /// A frame captured from the merchant's camera.
    CameraFrame(Vec<u8>),
    /// An image file uploaded by the merchant.
    UploadedImage(Vec<u8>),
    /// Token text pasted or typed by the merchant.
    Manual(String),
}

impl ScanInput {
    /// Short label for logs.
    #[inline]
    #[must_use]
    pub const fn source(&self) -> &'static str {
        match *self {
            Self::CameraFrame(_) => "camera",
            Self::UploadedImage(_) => "upload",
            Self::Manual(_) => "manual",
        }
    }

    /// Reduces the input to token text.
    ///
    /// # Errors
    ///
    /// Returns [`EduPerksError::MalformedToken`] if no QR symbol is found
    /// in an image, or if the resulting text is blank.
    #[inline]
    pub fn into_token<D: QrDecoder + ?Sized>(self, decoder: &D) -> Result<String> {
        let text = match self {
            Self::CameraFrame(image) | Self::UploadedImage(image) => decoder
                .decode(&image)
                .ok_or_else(|| EduPerksError::MalformedToken("no QR code found".to_owned()))?,
            Self::Manual(text) => text,
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EduPerksError::MalformedToken("empty token".to_owned()));
        }
        Ok(trimmed.to_owned())
    }
}

/// Resolves the caller to an approved merchant profile.
///
/// # Errors
///
/// Returns [`EduPerksError::Forbidden`] if the caller is anonymous, not a
/// merchant, has no merchant profile, or the profile is not approved.
#[inline]
pub fn authorize_merchant(tx: &Transaction<'_>, identity: Option<&Identity>) -> Result<Merchant> {
    let caller = require_role(identity, Role::Merchant)?;
    let merchant = tx
        .merchant_by_user(&caller.user_id)
        .ok_or_else(|| EduPerksError::Forbidden("no merchant profile for caller".to_owned()))?;
    ensure_approved(merchant)?;
    Ok(merchant.clone())
}

/// Checks a merchant's KYC approval.
///
/// # Errors
///
/// Returns [`EduPerksError::Forbidden`] if the merchant is not approved.
#[inline]
pub fn ensure_approved(merchant: &Merchant) -> Result<()> {
    if merchant.is_approved() {
        Ok(())
    } else {
        Err(EduPerksError::Forbidden(format!(
            "merchant {} is not approved (kyc: {})",
            merchant.id, merchant.kyc_status
        )))
    }
}

/// Logs a verification outcome at a level matching its class: integrity
/// failures at `warn`, business-state rejections and successes at `info`.
#[inline]
pub fn log_outcome(merchant_id: &MerchantId, outcome: &Result<RedemptionSnapshot>) {
    match outcome.as_ref() {
        Ok(snapshot) => info!(
            merchant = %merchant_id,
            redemption = %snapshot.redemption_id,
            "redemption consumed"
        ),
        Err(err) if err.kind().is_integrity_failure() => warn!(
            merchant = %merchant_id,
            error = %err,
            "rejected token failed integrity check"
        ),
        Err(err) if err.kind().is_business_state() => info!(
            merchant = %merchant_id,
            kind = %err.kind(),
            error = %err,
            "verification rejected"
        ),
        Err(err) => warn!(merchant = %merchant_id, error = %err, "verification failed"),
    }
}
