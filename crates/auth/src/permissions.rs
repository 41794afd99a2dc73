use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "entitlements.write"). The wildcard
/// permission `"*"` means "allow all".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const MODULES_READ: Permission = Permission::from_static("modules.read");
    pub const MODULES_WRITE: Permission = Permission::from_static("modules.write");
    pub const ENTITLEMENTS_READ: Permission = Permission::from_static("entitlements.read");
    pub const ENTITLEMENTS_WRITE: Permission = Permission::from_static("entitlements.write");
    pub const USERS_MIGRATE: Permission = Permission::from_static("users.migrate");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
