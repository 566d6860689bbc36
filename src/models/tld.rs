use serde::{Deserialize, Serialize};

/// A tracked top-level domain. Created by admin action, updated after each
/// successful ingestion cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tld {
    pub name: String,
    pub display_name: String,
    pub is_active: bool,
    pub last_import_date: Option<String>,
    pub last_drop_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TldUpsert {
    pub name: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}
