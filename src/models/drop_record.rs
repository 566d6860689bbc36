use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharsetType {
    Letters,
    Numbers,
    Mixed,
    Hyphenated,
    Idn,
}

impl CharsetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharsetType::Letters => "letters",
            CharsetType::Numbers => "numbers",
            CharsetType::Mixed => "mixed",
            CharsetType::Hyphenated => "hyphenated",
            CharsetType::Idn => "idn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "letters" => Some(CharsetType::Letters),
            "numbers" => Some(CharsetType::Numbers),
            "mixed" => Some(CharsetType::Mixed),
            "hyphenated" => Some(CharsetType::Hyphenated),
            "idn" => Some(CharsetType::Idn),
            _ => None,
        }
    }

    /// Classify a lowercased SLD label per spec §4.4.
    pub fn classify(label: &str) -> Self {
        if label.starts_with("xn--") {
            return CharsetType::Idn;
        }
        if label.contains('-') {
            return CharsetType::Hyphenated;
        }
        if label.chars().all(|c| c.is_ascii_digit()) {
            return CharsetType::Numbers;
        }
        if label.chars().all(|c| c.is_ascii_alphabetic()) {
            return CharsetType::Letters;
        }
        CharsetType::Mixed
    }
}

/// A second-level label present in a TLD's zone yesterday and absent today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropRecord {
    pub label: String,
    pub tld: String,
    pub drop_date: String,
    pub length: i64,
    pub label_count: i64,
    pub charset_type: CharsetType,
    pub quality_score: Option<u8>,
    pub created_at: String,
}

impl DropRecord {
    pub fn new(label: String, tld: String, drop_date: String, quality_score: Option<u8>) -> Self {
        let length = label.chars().count() as i64;
        let charset_type = CharsetType::classify(&label);
        Self {
            label,
            tld,
            drop_date,
            length,
            label_count: 1,
            charset_type,
            quality_score,
            created_at: String::new(),
        }
    }
}
