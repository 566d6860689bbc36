use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Glob,
    Regex,
    Contains,
    Prefix,
    Suffix,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Glob => "glob",
            PatternKind::Regex => "regex",
            PatternKind::Contains => "contains",
            PatternKind::Prefix => "prefix",
            PatternKind::Suffix => "suffix",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "glob" => Some(PatternKind::Glob),
            "regex" => Some(PatternKind::Regex),
            "contains" => Some(PatternKind::Contains),
            "prefix" => Some(PatternKind::Prefix),
            "suffix" => Some(PatternKind::Suffix),
            _ => None,
        }
    }
}

/// A user-owned filter over drops. `allowed_tlds`/`allowed_charsets` are
/// stored as JSON arrays; an empty/absent list means "no restriction".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: String,
    pub user_id: String,
    pub is_active: bool,
    pub pattern_kind: PatternKind,
    pub pattern: String,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub allowed_tlds: Vec<String>,
    pub allowed_charsets: Vec<String>,
    pub min_quality: Option<u8>,
    /// Set by the matcher when pattern compilation fails; the watchlist is
    /// then treated as inactive until the owner fixes the pattern.
    pub inactive_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistUpsert {
    pub user_id: String,
    pub pattern_kind: PatternKind,
    pub pattern: String,
    #[serde(default)]
    pub min_length: Option<i64>,
    #[serde(default)]
    pub max_length: Option<i64>,
    #[serde(default)]
    pub allowed_tlds: Vec<String>,
    #[serde(default)]
    pub allowed_charsets: Vec<String>,
    #[serde(default)]
    pub min_quality: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistMatch {
    pub watchlist_id: String,
    pub drop_id: i64,
    pub matched_at: String,
}
