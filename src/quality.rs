/// Pluggable quality-scoring policy (spec §6). The scorer is opaque to the
/// detector: it must be pure and fast, and its absence or non-determinism
/// across versions must never block detection (spec §9). Only a `None`
/// (absent) default and a deterministic test double live in this crate —
/// the actual scoring policy is out of scope.
pub type QualityScorer = Box<dyn Fn(&str, &str) -> Option<u8> + Send + Sync>;

pub fn null_scorer() -> QualityScorer {
    Box::new(|_label: &str, _tld: &str| None)
}

#[cfg(test)]
pub fn length_heuristic_scorer() -> QualityScorer {
    Box::new(|label: &str, _tld: &str| {
        let len = label.chars().count();
        Some(100u8.saturating_sub((len.saturating_sub(3) * 5) as u8))
    })
}
