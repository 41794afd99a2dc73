use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{role}' lacks permission '{permission}'")]
    Forbidden { role: String, permission: String },
}

/// Role → permission mapping.
///
/// "admin" is granted everything; "operator" may inspect the catalog and
/// entitlements but not change them. Unknown roles get nothing.
pub fn permissions_for_role(role: &str) -> Vec<Permission> {
    match role {
        "admin" => vec![Permission::WILDCARD],
        "operator" => vec![Permission::MODULES_READ, Permission::ENTITLEMENTS_READ],
        _ => Vec::new(),
    }
}

/// Authorize a principal for a single permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = permissions_for_role(principal.role.as_str());

    if granted
        .iter()
        .any(|p| p.is_wildcard() || p.as_str() == required.as_str())
    {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: principal.role.as_str().to_string(),
            permission: required.as_str().to_string(),
        })
    }
}
