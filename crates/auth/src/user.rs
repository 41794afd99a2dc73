//! User identity record.
//!
//! Profile editing and registration are handled outside this workspace; the
//! entitlement protocol only needs to look users up and move them between
//! categories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modgate_core::{Category, DomainError, Entity, UserId};

use crate::Role;

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    /// Already-hashed credential; never echoed back to clients.
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
    pub email: String,
    pub phone: String,
    /// 1 = male, 2 = female (source data convention).
    pub gender: u8,
    pub photo: Option<String>,
    /// The user's category label (`jenis_user`).
    pub category: Category,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for seeding a user account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub credential_hash: String,
    pub email: String,
    pub phone: String,
    pub gender: u8,
    pub photo: Option<String>,
    pub category: Category,
    pub role: Role,
}

impl NewUser {
    /// Validate and stamp the input into a [`User`].
    pub fn into_user(self, id: UserId, now: DateTime<Utc>) -> Result<User, DomainError> {
        let username = self.username.trim().to_string();
        if username.is_empty() {
            return Err(DomainError::validation("username must not be empty"));
        }
        if self.display_name.trim().is_empty() {
            return Err(DomainError::validation("display_name must not be empty"));
        }
        if !self.email.contains('@') {
            return Err(DomainError::validation(format!(
                "email '{}' is not an address",
                self.email
            )));
        }
        if !matches!(self.gender, 1 | 2) {
            return Err(DomainError::validation("gender must be 1 or 2"));
        }

        Ok(User {
            id,
            username,
            display_name: self.display_name,
            credential_hash: self.credential_hash,
            email: self.email,
            phone: self.phone,
            gender: self.gender,
            photo: self.photo,
            category: self.category,
            role: self.role,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> NewUser {
        NewUser {
            username: " budi ".to_string(),
            display_name: "Budi Santoso".to_string(),
            credential_hash: "$2b$10$hash".to_string(),
            email: "budi@example.ac.id".to_string(),
            phone: "0812".to_string(),
            gender: 1,
            photo: None,
            category: Category::new("mahasiswa").unwrap(),
            role: Role::new("civitas"),
        }
    }

    #[test]
    fn builds_user_with_trimmed_username() {
        let user = input().into_user(UserId::new(), Utc::now()).unwrap();
        assert_eq!(user.username, "budi");
        assert_eq!(user.category.as_str(), "mahasiswa");
    }

    #[test]
    fn rejects_bad_email_and_gender() {
        let mut bad = input();
        bad.email = "nope".to_string();
        assert!(bad.into_user(UserId::new(), Utc::now()).is_err());

        let mut bad = input();
        bad.gender = 7;
        assert!(bad.into_user(UserId::new(), Utc::now()).is_err());
    }

    #[test]
    fn credential_hash_is_not_serialized() {
        let user = input().into_user(UserId::new(), Utc::now()).unwrap();
        let v = serde_json::to_value(&user).unwrap();
        assert!(v.get("credential_hash").is_none());
        assert_eq!(v["category"], "mahasiswa");
    }
}
