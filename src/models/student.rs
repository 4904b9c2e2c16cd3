//! Student profile model.

use serde::{Deserialize, Serialize};

use super::{StudentId, UserId, VerificationStatus};

/// A student profile attached to a user with the student role.
///
/// Name and email are denormalized from the user account so redemption
/// snapshots can be shown to merchants without another lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Unique identifier.
    pub id: StudentId,
    /// Owning user account (1:1).
    pub user_id: UserId,
    /// Display name, if the student provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    pub email: String,
    /// Email verification state.
    pub verification_status: VerificationStatus,
}

impl Student {
    /// Returns `true` once the student's email has been verified.
    #[inline]
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_student_without_name() {
        let json = r#"{
            "id": "s-1",
            "userId": "u-1",
            "email": "ada@uni.example",
            "verificationStatus": "PENDING"
        }"#;
        let student: Student = serde_json::from_str(json).unwrap();
        assert!(student.name.is_none());
        assert!(!student.is_verified());
    }

    #[test]
    fn serialize_omits_missing_name() {
        let student = Student {
            id: StudentId::from("s-1"),
            user_id: UserId::from("u-1"),
            name: None,
            email: "ada@uni.example".to_owned(),
            verification_status: VerificationStatus::Verified,
        };
        let json = serde_json::to_string(&student).unwrap();
        assert!(!json.contains("name"));
        assert!(student.is_verified());
    }
}
