use serde::{Deserialize, Serialize};

/// Immutable record of a committed zone file download. Identified by
/// `(tld, date)`; never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub tld: String,
    pub date: String,
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub fetched_at: String,
}
