//! Append-only audit trail entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuditLogId, EntityKind, UserId};

/// Well-known audit action tags.
pub mod action {
    /// A redemption was issued to a student.
    pub const REDEMPTION_CREATE: &str = "REDEMPTION_CREATE";
    /// A redemption was consumed through QR verification.
    pub const QR_VERIFIED: &str = "QR_VERIFIED";
    /// A merchant published an offer.
    pub const OFFER_CREATE: &str = "OFFER_CREATE";
    /// An admin changed an offer's status.
    pub const OFFER_STATUS: &str = "OFFER_STATUS";
    /// An admin approved a merchant's KYC.
    pub const MERCHANT_APPROVED: &str = "MERCHANT_APPROVED";
    /// A student's email was verified.
    pub const STUDENT_VERIFIED: &str = "STUDENT_VERIFIED";
}

/// One entry in the audit trail. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Unique identifier.
    pub id: AuditLogId,
    /// User that performed the action; `None` for system actions.
    pub actor_id: Option<UserId>,
    /// Kind of the affected entity.
    pub entity: EntityKind,
    /// Identifier of the affected entity.
    pub entity_id: String,
    /// Free-form action tag, usually one of the [`action`] constants.
    pub action: String,
    /// Structured context for the action.
    #[serde(default)]
    pub meta: serde_json::Value,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Creates a new entry with a fresh identifier.
    #[inline]
    #[must_use]
    pub fn new<T: ToString + ?Sized>(
        actor_id: Option<UserId>,
        entity: EntityKind,
        entity_id: &T,
        action: &str,
        meta: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditLogId::generate(),
            actor_id,
            entity,
            entity_id: entity_id.to_string(),
            action: action.to_owned(),
            meta,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RedemptionId;

    #[test]
    fn entry_serializes_entity_as_upper_tag() {
        let entry = AuditLogEntry::new(
            Some(UserId::from("u-1")),
            EntityKind::Redemption,
            &RedemptionId::from("r-1"),
            action::QR_VERIFIED,
            serde_json::json!({ "offerId": "o-1" }),
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""entity":"REDEMPTION""#));
        assert!(json.contains(r#""action":"QR_VERIFIED""#));
        assert!(json.contains(r#""entityId":"r-1""#));
        let deserialized: AuditLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, entry);
    }
}
