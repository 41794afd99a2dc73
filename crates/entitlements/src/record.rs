use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modgate_core::{Category, Entity, ModuleId, RecordId, UserId, parse_ids};

use crate::{EntitlementResult, ModuleSet, UserSet};

/// Note stamped on records created implicitly for an individual assignment.
pub const CUSTOM_ASSIGNMENT_NOTE: &str = "custom assignment";

/// Grants a set of modules to a category, optionally narrowed to a subset of
/// that category's users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub id: RecordId,
    pub category: Category,
    pub user_ids: UserSet,
    pub module_ids: ModuleSet,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for EntitlementRecord {
    type Id = RecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl EntitlementRecord {
    /// A record scoped to one user, created on first bulk grant.
    pub fn custom_for_user(
        id: RecordId,
        category: Category,
        user_id: UserId,
        module_ids: ModuleSet,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            category,
            user_ids: UserSet::from(vec![user_id]),
            module_ids,
            note: Some(CUSTOM_ASSIGNMENT_NOTE.to_string()),
            created_at: now,
        }
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.user_ids.contains(user_id)
    }

    /// `true` when the user is the record's only member.
    pub fn is_exclusive_to(&self, user_id: &UserId) -> bool {
        self.user_ids.len() == 1 && self.contains_user(user_id)
    }

    /// Full replacement of the editable contents. Identity and creation time
    /// are preserved.
    pub fn replace_contents(&mut self, new: NewRecord) {
        self.category = new.category;
        self.user_ids = new.user_ids;
        self.module_ids = new.module_ids;
        self.note = new.note;
    }
}

/// Contents of a record supplied by an administrator (create or full update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub category: Category,
    pub user_ids: UserSet,
    pub module_ids: ModuleSet,
    pub note: Option<String>,
}

impl NewRecord {
    /// Build from raw request values; every id must parse before anything is
    /// returned.
    pub fn from_raw<S: AsRef<str>>(
        category: &str,
        user_ids: &[S],
        module_ids: &[S],
        note: Option<String>,
    ) -> EntitlementResult<Self> {
        let category = Category::new(category)?;
        let user_ids: Vec<UserId> = parse_ids(user_ids)?;
        let module_ids: Vec<ModuleId> = parse_ids(module_ids)?;

        Ok(Self {
            category,
            user_ids: user_ids.into(),
            module_ids: module_ids.into(),
            note: note.filter(|n| !n.trim().is_empty()),
        })
    }

    pub fn into_record(self, id: RecordId, now: DateTime<Utc>) -> EntitlementRecord {
        EntitlementRecord {
            id,
            category: self.category,
            user_ids: self.user_ids,
            module_ids: self.module_ids,
            note: self.note,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntitlementError;

    #[test]
    fn from_raw_dedupes_ids() {
        let m = ModuleId::new().to_string();
        let u = UserId::new().to_string();
        let rec = NewRecord::from_raw("dosen", &[u.clone(), u], &[m.clone(), m], None).unwrap();
        assert_eq!(rec.user_ids.len(), 1);
        assert_eq!(rec.module_ids.len(), 1);
    }

    #[test]
    fn from_raw_rejects_malformed_ids_and_blank_category() {
        let u = UserId::new().to_string();
        let err = NewRecord::from_raw("dosen", &[u.clone()], &["xyz".to_string()], None).unwrap_err();
        assert!(matches!(err, EntitlementError::InvalidIdentifier(_)));

        let err = NewRecord::from_raw(" ", &[u], &[], None).unwrap_err();
        assert!(matches!(err, EntitlementError::Validation(_)));
    }

    #[test]
    fn exclusive_only_with_a_single_member() {
        let (u, v) = (UserId::new(), UserId::new());
        let mine = EntitlementRecord::custom_for_user(RecordId::new(), Category::new("dosen").unwrap(), u, ModuleSet::new(), Utc::now());
        assert!(mine.is_exclusive_to(&u));
        assert!(!mine.is_exclusive_to(&v));

        let shared = NewRecord::from_raw("dosen", &[u.to_string(), v.to_string()], &[], None)
            .unwrap()
            .into_record(RecordId::new(), Utc::now());
        assert!(!shared.is_exclusive_to(&u));
    }

    #[test]
    fn replace_contents_keeps_identity_and_timestamp() {
        let now = Utc::now();
        let mut rec = NewRecord::from_raw::<String>("mahasiswa", &[], &[], Some("x".into()))
            .unwrap()
            .into_record(RecordId::new(), now);
        let id = rec.id;

        let m = ModuleId::new();
        rec.replace_contents(NewRecord {
            category: Category::new("dosen").unwrap(),
            user_ids: UserSet::new(),
            module_ids: ModuleSet::from(vec![m]),
            note: None,
        });

        assert_eq!(rec.id, id);
        assert_eq!(rec.created_at, now);
        assert_eq!(rec.category.as_str(), "dosen");
        assert!(rec.module_ids.contains(&m));
        assert_eq!(rec.note, None);
    }
}
