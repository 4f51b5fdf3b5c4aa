pub mod admin;
pub mod bookings;
pub mod payments;
pub mod services;
pub mod webhooks;

use crate::auth::{Principal, Role};
use crate::error::ApiError;

pub(crate) fn require_role(principal: &Principal, role: Role) -> Result<(), ApiError> {
    if principal.role != role {
        return Err(ApiError::forbidden(format!(
            "requires {} role",
            role.as_str()
        )));
    }
    Ok(())
}
