use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::db::DropwatchDb;
use crate::models::drop_record::DropRecord;
use crate::models::watchlist::{PatternKind, Watchlist};
use crate::notification::{NotificationRequest, NotificationSink};

/// A watchlist with its pattern compiled once at load time (spec §4.7,
/// §9 "Pattern compilation"). Invalid patterns never make it into the
/// index — [`CompiledWatchlist::compile`] instead deactivates the
/// watchlist in the database with a structured reason.
struct CompiledWatchlist {
    watchlist: Watchlist,
    predicate: CompiledPattern,
}

enum CompiledPattern {
    Glob(GlobMatcher),
    Regex(Regex),
    Contains(String),
    Prefix(String),
    Suffix(String),
}

impl CompiledPattern {
    fn matches(&self, label: &str) -> bool {
        match self {
            CompiledPattern::Glob(g) => g.is_match(label),
            CompiledPattern::Regex(r) => r.is_match(label),
            CompiledPattern::Contains(s) => label.contains(s.as_str()),
            CompiledPattern::Prefix(s) => label.starts_with(s.as_str()),
            CompiledPattern::Suffix(s) => label.ends_with(s.as_str()),
        }
    }
}

fn compile_pattern(kind: PatternKind, pattern: &str) -> anyhow::Result<CompiledPattern> {
    Ok(match kind {
        PatternKind::Glob => CompiledPattern::Glob(Glob::new(pattern)?.compile_matcher()),
        PatternKind::Regex => {
            // Anchored unless the pattern already supplies its own anchors,
            // per spec §4.7 "regex (anchored unless user opts out)".
            let anchored = if pattern.starts_with('^') || pattern.ends_with('$') {
                pattern.to_string()
            } else {
                format!("^{pattern}$")
            };
            CompiledPattern::Regex(Regex::new(&anchored)?)
        }
        PatternKind::Contains => CompiledPattern::Contains(pattern.to_string()),
        PatternKind::Prefix => CompiledPattern::Prefix(pattern.to_string()),
        PatternKind::Suffix => CompiledPattern::Suffix(pattern.to_string()),
    })
}

/// In-memory index of active watchlists, rebuilt once per matcher
/// invocation (spec §4.7: "Load the active watchlists once per cycle").
pub struct WatchlistIndex {
    compiled: Vec<CompiledWatchlist>,
}

impl WatchlistIndex {
    pub fn load(db: &DropwatchDb) -> anyhow::Result<Self> {
        let mut compiled = Vec::new();
        for watchlist in db.list_active_watchlists()? {
            match compile_pattern(watchlist.pattern_kind, &watchlist.pattern) {
                Ok(predicate) => compiled.push(CompiledWatchlist { watchlist, predicate }),
                Err(e) => {
                    let reason = format!("invalid {} pattern: {e}", watchlist.pattern_kind.as_str());
                    tracing::warn!(watchlist_id = %watchlist.id, %reason, "deactivating watchlist");
                    db.deactivate_watchlist(&watchlist.id, &reason)?;
                }
            }
        }
        Ok(Self { compiled })
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Evaluate one drop against one compiled watchlist, short-circuiting in
/// cost order per spec §4.7 steps 1–5.
fn matches(w: &CompiledWatchlist, drop: &DropRecord) -> bool {
    let watchlist = &w.watchlist;

    if !watchlist.allowed_tlds.is_empty() && !watchlist.allowed_tlds.iter().any(|t| t == &drop.tld) {
        return false;
    }
    if let Some(min) = watchlist.min_length {
        if drop.length < min {
            return false;
        }
    }
    if let Some(max) = watchlist.max_length {
        if drop.length > max {
            return false;
        }
    }
    if !watchlist.allowed_charsets.is_empty()
        && !watchlist
            .allowed_charsets
            .iter()
            .any(|c| c == drop.charset_type.as_str())
    {
        return false;
    }
    if let Some(min_quality) = watchlist.min_quality {
        match drop.quality_score {
            Some(q) if q >= min_quality => {}
            _ => return false,
        }
    }
    w.predicate.matches(&drop.label)
}

/// Evaluate a freshly-persisted batch of drops against the active watchlist
/// index and submit a notification request for each surviving match, in
/// drop order (spec §5: "drops are processed in the order produced by the
/// detector"). `drops` pairs each record with the row id `persist` assigned
/// it, which is what the unique `(watchlist_id, drop_id)` constraint and the
/// notification payload both key on.
pub fn match_and_notify(
    db: &Arc<DropwatchDb>,
    index: &WatchlistIndex,
    drops: &[(i64, DropRecord)],
    sink: &dyn NotificationSink,
) -> anyhow::Result<usize> {
    let mut matched = 0;
    for (drop_id, drop) in drops {
        for w in &index.compiled {
            if !matches(w, drop) {
                continue;
            }
            let newly_matched = db.insert_watchlist_match(&w.watchlist.id, *drop_id)?;
            if !newly_matched {
                continue;
            }
            sink.submit(NotificationRequest {
                user_id: w.watchlist.user_id.clone(),
                drop: drop.clone(),
                watchlist_id: w.watchlist.id.clone(),
            })?;
            matched += 1;
        }
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drop_persister;
    use crate::models::watchlist::WatchlistUpsert;
    use crate::notification::CollectingNotificationSink;

    fn drop(label: &str, tld: &str) -> DropRecord {
        DropRecord::new(label.to_string(), tld.to_string(), "2025-01-02".to_string(), None)
    }

    /// Persist `drops` so their ids satisfy the `drop_records` foreign key
    /// `watchlist_matches` carries, then pair each with its assigned id.
    fn persisted(db: &Arc<DropwatchDb>, tld: &str, drops: Vec<DropRecord>) -> Vec<(i64, DropRecord)> {
        db.upsert_tld(tld, tld, true).unwrap();
        let outcome = drop_persister::persist_default(db, tld, "2025-01-02", &drops).unwrap();
        outcome.ids.into_iter().zip(drops).collect()
    }

    #[test]
    fn glob_prefix_and_length_filters() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.create_watchlist(
            "w1",
            &WatchlistUpsert {
                user_id: "u1".to_string(),
                pattern_kind: PatternKind::Glob,
                pattern: "a*".to_string(),
                min_length: Some(3),
                max_length: None,
                allowed_tlds: vec!["dev".to_string()],
                allowed_charsets: vec![],
                min_quality: None,
            },
        )
        .unwrap();

        let index = WatchlistIndex::load(&db).unwrap();
        assert_eq!(index.len(), 1);

        let sink = CollectingNotificationSink::new();
        let drops = persisted(&db, "dev", vec![drop("alpha", "dev"), drop("al", "dev")]);
        let matched = match_and_notify(&db, &index, &drops, &sink).unwrap();

        assert_eq!(matched, 1, "only 'alpha' clears the length >= 3 bound");
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].drop.label, "alpha");
    }

    #[test]
    fn invalid_regex_deactivates_watchlist() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.create_watchlist(
            "w2",
            &WatchlistUpsert {
                user_id: "u1".to_string(),
                pattern_kind: PatternKind::Regex,
                pattern: "(unclosed".to_string(),
                min_length: None,
                max_length: None,
                allowed_tlds: vec![],
                allowed_charsets: vec![],
                min_quality: None,
            },
        )
        .unwrap();

        let index = WatchlistIndex::load(&db).unwrap();
        assert!(index.is_empty());
        let watchlists = db.list_active_watchlists().unwrap();
        assert!(watchlists.is_empty());
    }

    #[test]
    fn duplicate_matches_are_not_renotified() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.create_watchlist(
            "w3",
            &WatchlistUpsert {
                user_id: "u1".to_string(),
                pattern_kind: PatternKind::Contains,
                pattern: "alp".to_string(),
                min_length: None,
                max_length: None,
                allowed_tlds: vec![],
                allowed_charsets: vec![],
                min_quality: None,
            },
        )
        .unwrap();
        let index = WatchlistIndex::load(&db).unwrap();
        let sink = CollectingNotificationSink::new();

        let drops = persisted(&db, "dev", vec![drop("alpha", "dev")]);
        match_and_notify(&db, &index, &drops, &sink).unwrap();
        match_and_notify(&db, &index, &drops, &sink).unwrap();

        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }
}
