use crate::error::{DropwatchError, Result};
use crate::models::drop_record::DropRecord;
use crate::zone_parser::LabelSet;

/// Compute `prev \ today` and derive per-drop metadata (spec §4.4).
///
/// When both sides stayed in memory during parsing this is a straightforward
/// hash-set difference. When either side was spilled to disk (cardinality
/// exceeded the parser's memory budget) this instead walks both sides as
/// sorted streams with a linear two-pointer merge, holding only the current
/// line of each side at once rather than materializing both sets together
/// (spec §9).
pub fn detect(
    prev: LabelSet,
    today: LabelSet,
    tld: &str,
    drop_date: &str,
    mut score: impl FnMut(&str, &str) -> Option<u8>,
) -> Result<Vec<DropRecord>> {
    let dropped_labels = diff_labels(prev, today)?;
    Ok(dropped_labels
        .into_iter()
        .map(|label| {
            let quality_score = score(&label, tld);
            DropRecord::new(label, tld.to_string(), drop_date.to_string(), quality_score)
        })
        .collect())
}

fn diff_labels(prev: LabelSet, today: LabelSet) -> Result<Vec<String>> {
    if let (LabelSet::Memory(p), LabelSet::Memory(t)) = (&prev, &today) {
        return Ok(p.iter().filter(|l| !t.contains(l.as_str())).cloned().collect());
    }
    sorted_merge_diff(&prev, &today)
}

/// Streaming two-pointer merge over each side's sorted label stream (spec
/// §4.4/§9): elements of `prev` absent from `today` are emitted without ever
/// holding either side's full set in memory simultaneously.
fn sorted_merge_diff(prev: &LabelSet, today: &LabelSet) -> Result<Vec<String>> {
    let mut prev_stream = prev.sorted_stream()?;
    let mut today_stream = today.sorted_stream()?;

    let io_err = |e: std::io::Error| DropwatchError::Parser(format!("reading sorted label stream: {e}"));

    let mut out = Vec::new();
    let mut p = prev_stream.next().transpose().map_err(io_err)?;
    let mut t = today_stream.next().transpose().map_err(io_err)?;

    loop {
        match (&p, &t) {
            (None, _) => break,
            (Some(pv), None) => {
                out.push(pv.clone());
                p = prev_stream.next().transpose().map_err(io_err)?;
            }
            (Some(pv), Some(tv)) => match pv.cmp(tv) {
                std::cmp::Ordering::Less => {
                    out.push(pv.clone());
                    p = prev_stream.next().transpose().map_err(io_err)?;
                }
                std::cmp::Ordering::Equal => {
                    p = prev_stream.next().transpose().map_err(io_err)?;
                    t = today_stream.next().transpose().map_err(io_err)?;
                }
                std::cmp::Ordering::Greater => {
                    t = today_stream.next().transpose().map_err(io_err)?;
                }
            },
        }
    }
    Ok(out)
}

/// Memoizing wrapper for a [`crate::quality::QualityScorer`] so the detector
/// never calls it twice for the same `(label, tld)` within a cycle (spec §6:
/// "the detector may memoize").
pub struct MemoizedScorer<'a> {
    inner: &'a dyn Fn(&str, &str) -> Option<u8>,
    cache: std::collections::HashMap<(String, String), Option<u8>>,
}

impl<'a> MemoizedScorer<'a> {
    pub fn new(inner: &'a dyn Fn(&str, &str) -> Option<u8>) -> Self {
        Self {
            inner,
            cache: std::collections::HashMap::new(),
        }
    }

    pub fn score(&mut self, label: &str, tld: &str) -> Option<u8> {
        *self
            .cache
            .entry((label.to_string(), tld.to_string()))
            .or_insert_with(|| (self.inner)(label, tld))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn mem(labels: &[&str]) -> LabelSet {
        LabelSet::Memory(labels.iter().map(|s| s.to_string()).collect())
    }

    fn spilled(labels: &[&str]) -> LabelSet {
        let tld = "dev";
        let body: String = labels.iter().map(|l| format!("{l}.{tld}. NS ns1.\n")).collect();
        crate::zone_parser::parse_labels(std::io::Cursor::new(body), tld, 1).unwrap()
    }

    #[test]
    fn basic_diff() {
        let prev = mem(&["alpha", "beta"]);
        let today = mem(&["alpha"]);
        let drops = detect(prev, today, "dev", "2025-01-02", |_, _| None).unwrap();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].label, "beta");
    }

    #[test]
    fn no_drops_when_sets_equal() {
        let prev = mem(&["alpha", "beta"]);
        let today = mem(&["alpha", "beta"]);
        let drops = detect(prev, today, "dev", "2025-01-02", |_, _| None).unwrap();
        assert!(drops.is_empty());
    }

    #[test]
    fn sorted_merge_matches_hash_diff() {
        let prev_labels = ["a", "b", "c", "d", "e"];
        let today_labels = ["b", "d"];

        let via_merge = {
            let mut v = sorted_merge_diff(&mem(&prev_labels), &mem(&today_labels)).unwrap();
            v.sort();
            v
        };
        let prev_hash: HashSet<String> = prev_labels.iter().map(|s| s.to_string()).collect();
        let today_hash: HashSet<String> = today_labels.iter().map(|s| s.to_string()).collect();
        let mut via_hash: Vec<String> = prev_hash.difference(&today_hash).cloned().collect();
        via_hash.sort();
        assert_eq!(via_merge, via_hash);
    }

    /// Forces both sides through the spilled-to-disk path and confirms the
    /// streaming merge diff agrees with the in-memory hash-set diff.
    #[test]
    fn spilled_path_matches_in_memory_diff() {
        let prev = spilled(&["alpha", "beta", "gamma"]);
        let today = spilled(&["alpha"]);
        assert!(matches!(prev, LabelSet::Spilled { .. }));

        let mut drops = detect(prev, today, "dev", "2025-01-02", |_, _| None).unwrap();
        drops.sort_by(|a, b| a.label.cmp(&b.label));
        let labels: Vec<&str> = drops.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["beta", "gamma"]);
    }

    /// One side spilled, the other stayed in memory — the mixed path still
    /// has to fall back to the streaming merge rather than the hash fast path.
    #[test]
    fn mixed_memory_and_spilled_sides() {
        let prev = mem(&["alpha", "beta", "gamma"]);
        let today = spilled(&["alpha"]);

        let mut drops = detect(prev, today, "dev", "2025-01-02", |_, _| None).unwrap();
        drops.sort_by(|a, b| a.label.cmp(&b.label));
        let labels: Vec<&str> = drops.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["beta", "gamma"]);
    }
}
