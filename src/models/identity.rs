//! The authenticated caller, as reported by the session subsystem.

use serde::{Deserialize, Serialize};

use super::{Role, UserId};
use crate::error::{EduPerksError, Result};

/// Current user and role. Obtained from the session layer; `None` means
/// the request is anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Authenticated user.
    pub user_id: UserId,
    /// Role granted to the user.
    pub role: Role,
}

impl Identity {
    /// Creates an identity.
    #[inline]
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// Checks that a caller is present and holds `role`.
///
/// # Errors
///
/// Returns [`EduPerksError::Forbidden`] for anonymous callers and for
/// callers with any other role.
#[inline]
pub fn require_role(identity: Option<&Identity>, role: Role) -> Result<&Identity> {
    match identity {
        Some(caller) if caller.role == role => Ok(caller),
        Some(caller) => Err(EduPerksError::Forbidden(format!(
            "{role} access required, caller is {}",
            caller.role
        ))),
        None => Err(EduPerksError::Forbidden(format!(
            "{role} access required, caller is not signed in"
        ))),
    }
}
