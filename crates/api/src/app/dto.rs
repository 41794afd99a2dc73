use serde::Deserialize;
use serde_json::{Value, json};

use modgate_catalog::Module;
use modgate_entitlements::EntitlementRecord;

// -------------------------
// Request DTOs
// -------------------------

/// Body for creating or fully replacing an entitlement record.
#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub jenis_user: String,
    #[serde(default, alias = "user_id")]
    pub user_ids: Vec<String>,
    #[serde(default, alias = "modul_id")]
    pub modul_ids: Vec<String>,
    #[serde(default, alias = "catatan")]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkManageRequest {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub modul_ids: Vec<String>,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: String,
    pub modul_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    pub user_id: String,
    pub old_modul: String,
    pub new_modul: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeUserTypeRequest {
    pub user_id: String,
    pub new_type: String,
    #[serde(default)]
    pub new_moduls: Vec<String>,
    /// Overwrite the target record's modules instead of merging.
    #[serde(default)]
    pub replace_moduls: bool,
}

// -------------------------
// Response mapping
// -------------------------

pub fn module_to_json(m: &Module) -> Value {
    json!({
        "id": m.id.to_string(),
        "nm_modul": m.name,
        "ket_modul": m.description,
        "alamat": m.path,
        "is_aktif": m.active,
        "urutan": m.order,
        "gbr_icon": m.icon,
        "created_at": m.created_at.to_rfc3339(),
        "updated_at": m.updated_at.to_rfc3339(),
    })
}

pub fn record_to_json(r: &EntitlementRecord) -> Value {
    json!({
        "id": r.id.to_string(),
        "jenis_user": r.category.as_str(),
        "user_id": r.user_ids.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
        "modul_id": r.module_ids.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        "catatan": r.note,
        "created_at": r.created_at.to_rfc3339(),
    })
}
