//! Tamper-evident QR tokens.
//!
//! A token is `base64(json) + "." + digest`, where `json` is the serialized
//! [`TokenPayload`] and `digest` is the first 16 hex characters of the
//! SHA-256 of those JSON bytes (not of the base64 text). Decoding needs no
//! database access: a token whose payload and digest disagree is rejected
//! as tampered.
//!
//! The digest is unkeyed. It catches corrupted scans and naive edits, but
//! anyone who knows the scheme can mint a valid token for a guessed
//! redemption ID.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq as _;

use crate::error::{EduPerksError, Result};
use crate::models::{OfferId, Redemption, RedemptionId};

/// Separator between the encoded payload and its digest.
const SEPARATOR: char = '.';

/// Number of hex characters kept from the SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 16;

/// Data carried by a QR token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Redemption identifier.
    pub rid: RedemptionId,
    /// Offer identifier.
    pub oid: OfferId,
}

impl TokenPayload {
    /// Payload identifying `redemption`.
    #[inline]
    #[must_use]
    pub fn for_redemption(redemption: &Redemption) -> Self {
        Self {
            rid: redemption.id.clone(),
            oid: redemption.offer_id.clone(),
        }
    }
}

/// Encodes a payload into a token string.
///
/// # Errors
///
/// Returns [`EduPerksError::Serialization`] if the payload cannot be
/// serialized.
#[inline]
pub fn encode(payload: &TokenPayload) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(format!(
        "{}{SEPARATOR}{}",
        BASE64.encode(&bytes),
        short_digest(&bytes)
    ))
}

/// Decodes and integrity-checks a token string.
///
/// Surrounding whitespace (common in pasted or scanned text) is ignored.
/// The standard base64 alphabet has no `.`, so the first `.` ends the
/// payload; anything after it is compared as the digest.
///
/// # Errors
///
/// Returns [`EduPerksError::MalformedToken`] if the separator or either
/// part is missing, the payload is not valid base64, or the verified bytes
/// are not a payload. Returns [`EduPerksError::TamperedToken`] if the
/// digest, including any stray `.` inside it, does not match the payload
/// bytes.
#[inline]
pub fn decode(token: &str) -> Result<TokenPayload> {
    let Some((encoded, supplied)) = token.trim().split_once(SEPARATOR) else {
        return Err(EduPerksError::MalformedToken(
            "missing digest separator".to_owned(),
        ));
    };
    if encoded.is_empty() || supplied.is_empty() {
        return Err(EduPerksError::MalformedToken(
            "empty payload or digest".to_owned(),
        ));
    }

    let bytes = BASE64
        .decode(encoded)
        .map_err(|err| EduPerksError::MalformedToken(format!("payload is not base64: {err}")))?;

    let expected = short_digest(&bytes);
    if !bool::from(expected.as_bytes().ct_eq(supplied.as_bytes())) {
        return Err(EduPerksError::TamperedToken);
    }

    serde_json::from_slice(&bytes)
        .map_err(|err| EduPerksError::MalformedToken(format!("unreadable payload: {err}")))
}

/// Token for a redemption.
///
/// # Errors
///
/// Returns [`EduPerksError::Serialization`] if the payload cannot be
/// serialized.
#[inline]
pub fn for_redemption(redemption: &Redemption) -> Result<String> {
    encode(&TokenPayload::for_redemption(redemption))
}

/// Lowercase hex SHA-256 of `bytes`, truncated to [`DIGEST_HEX_LEN`].
fn short_digest(bytes: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(bytes));
    digest.truncate(DIGEST_HEX_LEN);
    digest
}
