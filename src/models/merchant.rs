//! Merchant profile model.

use serde::{Deserialize, Serialize};

use super::{KycStatus, MerchantId, UserId};

/// A merchant profile attached to a user with the merchant role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    /// Unique identifier.
    pub id: MerchantId,
    /// Owning user account (1:1).
    pub user_id: UserId,
    /// Registered legal name.
    pub legal_name: String,
    /// Store name shown to students.
    pub trade_name: String,
    /// KYC review state.
    pub kyc_status: KycStatus,
}

impl Merchant {
    /// Returns `true` once an admin has approved the merchant's KYC.
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.kyc_status == KycStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_merchant() {
        let json = r#"{
            "id": "merchant-001",
            "userId": "user-9",
            "legalName": "Test Merchant Pvt Ltd",
            "tradeName": "Cool Store",
            "kycStatus": "APPROVED"
        }"#;
        let merchant: Merchant = serde_json::from_str(json).unwrap();
        assert_eq!(merchant.id, MerchantId::new("merchant-001".to_owned()));
        assert_eq!(merchant.trade_name, "Cool Store");
        assert!(merchant.is_approved());
    }

    #[test]
    fn pending_merchant_is_not_approved() {
        let merchant = Merchant {
            id: MerchantId::from("m-1"),
            user_id: UserId::from("u-1"),
            legal_name: "Legal".to_owned(),
            trade_name: "Trade".to_owned(),
            kyc_status: KycStatus::Pending,
        };
        assert!(!merchant.is_approved());
        let json = serde_json::to_string(&merchant).unwrap();
        let deserialized: Merchant = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, merchant);
    }
}
