//! Error types for the edu-perks redemption core.
//!
//! Every failure a caller can observe is an [`EduPerksError`]. Callers that
//! need to branch on the failure class (HTTP status mapping, alerting) use
//! [`EduPerksError::kind`], which yields a `Copy` [`ErrorKind`] with a stable
//! user-facing message.

use chrono::{DateTime, Utc};

use crate::models::{EntityKind, OfferStatus, RedemptionSnapshot};

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, EduPerksError>;

/// All errors that can occur when issuing, verifying or querying
/// redemptions.
#[derive(Debug, thiserror::Error)]
pub enum EduPerksError {
    /// The token is structurally invalid (missing separator, bad base64,
    /// unparsable payload) or no token could be extracted from the input.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token's digest does not match its payload.
    #[error("token digest mismatch, data was tampered with")]
    TamperedToken,

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of the missing entity.
        entity: EntityKind,
        /// Identifier that was looked up.
        id: String,
    },

    /// The caller's role or ownership does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The redemption was already consumed. Carries the prior-use snapshot
    /// so callers can show when and by whom it was used.
    #[error("redemption {} already consumed", .0.redemption_id)]
    AlreadyConsumed(Box<RedemptionSnapshot>),

    /// The offer's validity window has ended.
    #[error("offer expired at {ended_at}")]
    Expired {
        /// End of the offer's validity window.
        ended_at: DateTime<Utc>,
    },

    /// The offer has reached its student cap.
    #[error("offer capacity of {cap} students reached")]
    CapacityExceeded {
        /// Configured student cap.
        cap: u32,
    },

    /// The offer is not in `ACTIVE` status.
    #[error("offer is not active (status: {status})")]
    NotActive {
        /// Current offer status.
        status: OfferStatus,
    },

    /// Caller-supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend failed.
    #[error("storage error: {0}")]
    Storage(Box<dyn core::error::Error + Send + Sync>),
}

impl EduPerksError {
    /// Shorthand for a [`EduPerksError::NotFound`] error.
    #[inline]
    #[must_use]
    pub fn not_found<T: ToString + ?Sized>(entity: EntityKind, id: &T) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns the classification of this error.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match *self {
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::TamperedToken => ErrorKind::TamperedToken,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::AlreadyConsumed(_) => ErrorKind::AlreadyConsumed,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::NotActive { .. } => ErrorKind::NotActive,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Serialization(_) | Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Returns the prior-use snapshot carried by
    /// [`EduPerksError::AlreadyConsumed`].
    #[inline]
    #[must_use]
    #[allow(
        clippy::ref_patterns,
        reason = "borrows the boxed snapshot out of `&self`"
    )]
    pub fn prior_use(&self) -> Option<&RedemptionSnapshot> {
        match *self {
            Self::AlreadyConsumed(ref snapshot) => Some(snapshot),
            Self::MalformedToken(_)
            | Self::TamperedToken
            | Self::NotFound { .. }
            | Self::Forbidden(_)
            | Self::Expired { .. }
            | Self::CapacityExceeded { .. }
            | Self::NotActive { .. }
            | Self::InvalidInput(_)
            | Self::Serialization(_)
            | Self::Storage(_) => None,
        }
    }
}

/// Caller-facing classification of an [`EduPerksError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structurally invalid token.
    MalformedToken,
    /// Token digest mismatch.
    TamperedToken,
    /// Offer, student, merchant or redemption missing.
    NotFound,
    /// Role or ownership mismatch.
    Forbidden,
    /// Redemption already consumed.
    AlreadyConsumed,
    /// Offer validity window ended.
    Expired,
    /// Offer student cap reached.
    CapacityExceeded,
    /// Offer not in `ACTIVE` status.
    NotActive,
    /// Input validation failed.
    InvalidInput,
    /// Serialization or storage failure.
    Internal,
}

impl ErrorKind {
    /// Stable user-facing message for this kind.
    #[inline]
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::MalformedToken => "Invalid QR code format",
            Self::TamperedToken => "Invalid QR code - tampered data detected",
            Self::NotFound => "Not found",
            Self::Forbidden => "You are not allowed to do this",
            Self::AlreadyConsumed => "Already redeemed",
            Self::Expired => "This offer has expired",
            Self::CapacityExceeded => "This offer has reached its redemption limit",
            Self::NotActive => "Offer not available",
            Self::InvalidInput => "Invalid input",
            Self::Internal => "Something went wrong, please try again",
        }
    }

    /// Returns `true` for token integrity failures, which may indicate
    /// abuse and are logged at a higher level.
    #[inline]
    #[must_use]
    pub const fn is_integrity_failure(self) -> bool {
        matches!(self, Self::MalformedToken | Self::TamperedToken)
    }

    /// Returns `true` for rejections caused by the business state of an
    /// offer or redemption rather than by bad input.
    #[inline]
    #[must_use]
    pub const fn is_business_state(self) -> bool {
        matches!(
            self,
            Self::AlreadyConsumed | Self::Expired | Self::CapacityExceeded | Self::NotActive
        )
    }
}

impl core::fmt::Display for ErrorKind {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}
