use serde::{Deserialize, Serialize};

use modgate_core::Category;

use crate::{JwtClaims, Role};

/// An authenticated caller, as resolved from a validated token.
///
/// This is the `{subject, role, category}` triple every protected operation
/// authorizes against. Construction is decoupled from transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
    pub category: Option<Category>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, role: Role, category: Option<Category>) -> Self {
        Self {
            subject: subject.into(),
            role,
            category,
        }
    }

    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            role: claims.role.clone(),
            category: claims.category.clone(),
        }
    }
}
