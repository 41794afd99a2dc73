//! User category label (`jenis_user`), e.g. "mahasiswa" or "dosen".

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Category label grouping users by type.
///
/// Labels are trimmed on construction and must not be empty. Comparison is
/// exact (case-sensitive), matching how labels are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(label: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = label.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("category must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Category {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}

impl core::str::FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
