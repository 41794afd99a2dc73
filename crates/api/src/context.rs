use modgate_auth::{Principal, Role};

/// Principal context for a request (authenticated identity + role).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn subject(&self) -> &str {
        &self.principal.subject
    }

    pub fn role(&self) -> &Role {
        &self.principal.role
    }
}
