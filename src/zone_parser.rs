use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use crate::error::{DropwatchError, Result};

/// Labels held in memory at once before a run is spilled to disk and the
/// in-memory set is reset (spec §4.3: "fall back to external-sort dedup when
/// expected cardinality exceeds a memory budget").
pub const DEFAULT_MEMORY_BUDGET: usize = 20_000_000;

/// Observe a parser's progress every `N` lines so the caller can yield at a
/// cancellation checkpoint (spec §5: "explicit yield checkpoints every N
/// parser lines, default 100k").
pub const YIELD_CHECKPOINT_LINES: usize = 100_000;

/// The unique SLD labels extracted from a zone file. Below `memory_budget`
/// labels this stays a plain `HashSet`. Past it, `parse_labels` spills sorted
/// runs to temp files as it goes and returns a handle to one merged, sorted,
/// deduplicated file on disk — peak memory during parsing is bounded by
/// `memory_budget`, never by total zone cardinality (spec §4.3/§9).
pub enum LabelSet {
    Memory(HashSet<String>),
    Spilled { path: PathBuf, count: u64 },
}

impl LabelSet {
    pub fn len(&self) -> u64 {
        match self {
            LabelSet::Memory(s) => s.len() as u64,
            LabelSet::Spilled { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A sorted, deduplicated stream of this set's labels. The in-memory
    /// case sorts a `Vec` once; the spilled case streams lines straight off
    /// disk so diffing two spilled sets never holds either one whole.
    pub(crate) fn sorted_stream(&self) -> Result<Box<dyn Iterator<Item = std::io::Result<String>>>> {
        match self {
            LabelSet::Memory(s) => {
                let mut sorted: Vec<String> = s.iter().cloned().collect();
                sorted.sort_unstable();
                Ok(Box::new(sorted.into_iter().map(Ok)))
            }
            LabelSet::Spilled { path, .. } => {
                let file = std::fs::File::open(path).map_err(|e| {
                    DropwatchError::Parser(format!("reopening spill file {}: {e}", path.display()))
                })?;
                Ok(Box::new(BufReader::new(file).lines()))
            }
        }
    }
}

impl Drop for LabelSet {
    fn drop(&mut self) {
        if let LabelSet::Spilled { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Tracks spilled run files for the duration of `parse_labels` and removes
/// any not already consumed when dropped, so a failure partway through
/// spilling or merging doesn't leave run files behind in the temp dir.
struct RunFiles(Vec<PathBuf>);

impl Drop for RunFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn is_valid_sld(label: &str) -> bool {
    if label.starts_with("xn--") {
        return label.len() > 4 && label[4..].chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    }
    let bytes = label.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let first_ok = bytes[0].is_ascii_alphanumeric();
    let last_ok = bytes[bytes.len() - 1].is_ascii_alphanumeric();
    let middle_ok = bytes.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'-');
    first_ok && last_ok && middle_ok
}

/// Parse an owner name token into `(sld, tld)` if it resolves (absolute or
/// relative to `origin`) to exactly two labels under `origin`'s TLD.
fn extract_sld(token: &str, origin: &str, tld: &str) -> Option<String> {
    let absolute = if token.ends_with('.') {
        token.to_ascii_lowercase()
    } else {
        format!("{}.{}", token, origin).to_ascii_lowercase()
    };
    let trimmed = absolute.trim_end_matches('.');
    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels.len() != 2 {
        return None;
    }
    let (sld, label_tld) = (labels[0], labels[1]);
    if label_tld != tld.trim_end_matches('.').to_ascii_lowercase() {
        return None;
    }
    if !is_valid_sld(sld) {
        return None;
    }
    Some(sld.to_string())
}

/// Streaming, line-oriented master-file parser. Extracts the unique set of
/// lowercased SLD labels under `tld` from `reader` (spec §4.3), spilling to
/// disk once the in-memory set would exceed `memory_budget` labels.
///
/// `reader` is decoded as UTF-8 lossily (invalid byte sequences become
/// `U+FFFD`) so a single malformed byte sequence doesn't abort an otherwise
/// valid multi-gigabyte file; malformed owner names are simply skipped by
/// [`extract_sld`]'s grammar check.
pub fn parse_labels<R: Read>(reader: R, tld: &str, memory_budget: usize) -> Result<LabelSet> {
    let memory_budget = memory_budget.max(1);
    let tld = tld.trim_end_matches('.').to_ascii_lowercase();
    let mut origin = format!("{tld}.");
    let mut current: HashSet<String> = HashSet::new();
    let mut runs = RunFiles(Vec::new());
    let mut buf = BufReader::new(reader);
    let mut raw_line: Vec<u8> = Vec::new();
    let mut i = 0usize;

    loop {
        raw_line.clear();
        let read = buf
            .read_until(b'\n', &mut raw_line)
            .map_err(|e| DropwatchError::Parser(format!("read error at line {i}: {e}")))?;
        if read == 0 {
            break;
        }
        i += 1;

        let line = String::from_utf8_lossy(&raw_line);
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("$ORIGIN") {
            let candidate = rest.trim().split_whitespace().next().unwrap_or("");
            if !candidate.is_empty() {
                origin = candidate.to_ascii_lowercase();
            }
            continue;
        }
        if line.starts_with("$TTL") || line.starts_with("$INCLUDE") {
            continue;
        }

        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        if let Some(sld) = extract_sld(token, &origin, &tld) {
            current.insert(sld);
        }

        if current.len() >= memory_budget {
            let run = spill_run(&current)?;
            runs.0.push(run);
            current.clear();
        }

        if i % YIELD_CHECKPOINT_LINES == 0 {
            tracing::trace!(lines = i, "zone parser checkpoint");
        }
    }

    if runs.0.is_empty() {
        return Ok(LabelSet::Memory(current));
    }

    if !current.is_empty() {
        let run = spill_run(&current)?;
        runs.0.push(run);
    }
    drop(current);

    let (merged_path, merged_count) = merge_runs(&runs.0)?;
    for run in &runs.0 {
        let _ = std::fs::remove_file(run);
    }
    runs.0.clear();
    Ok(LabelSet::Spilled {
        path: merged_path,
        count: merged_count,
    })
}

fn spill_run(labels: &HashSet<String>) -> Result<PathBuf> {
    let mut sorted: Vec<&String> = labels.iter().collect();
    sorted.sort_unstable();
    let path = std::env::temp_dir().join(format!("dropwatch-zone-run-{}.tmp", uuid::Uuid::new_v4()));
    let file = std::fs::File::create(&path)
        .map_err(|e| DropwatchError::Parser(format!("spilling parse run to {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    for label in sorted {
        writeln!(writer, "{label}")
            .map_err(|e| DropwatchError::Parser(format!("writing parse run: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| DropwatchError::Parser(format!("flushing parse run: {e}")))?;
    Ok(path)
}

/// K-way merge of already-sorted, already-deduplicated run files into one
/// sorted, deduplicated output file, holding only one line per run in memory
/// at a time regardless of how large any individual run was.
fn merge_runs(runs: &[PathBuf]) -> Result<(PathBuf, u64)> {
    struct Cursor {
        lines: std::io::Lines<BufReader<std::fs::File>>,
        current: Option<String>,
    }

    let mut cursors = Vec::with_capacity(runs.len());
    for path in runs {
        let file = std::fs::File::open(path)
            .map_err(|e| DropwatchError::Parser(format!("reopening parse run {}: {e}", path.display())))?;
        let mut lines = BufReader::new(file).lines();
        let current = lines
            .next()
            .transpose()
            .map_err(|e| DropwatchError::Parser(format!("reading parse run {}: {e}", path.display())))?;
        cursors.push(Cursor { lines, current });
    }

    let out_path = std::env::temp_dir().join(format!("dropwatch-zone-merged-{}.tmp", uuid::Uuid::new_v4()));
    // Guarded so a write/flush failure below doesn't leak this file; disarmed
    // just before the successful return.
    let mut out_guard = RunFiles(vec![out_path.clone()]);
    let out_file = std::fs::File::create(&out_path)
        .map_err(|e| DropwatchError::Parser(format!("creating merged parse output {}: {e}", out_path.display())))?;
    let mut out = BufWriter::new(out_file);
    let mut count = 0u64;
    let mut last_written: Option<String> = None;

    loop {
        let mut min_idx: Option<usize> = None;
        for (idx, cursor) in cursors.iter().enumerate() {
            let Some(v) = &cursor.current else { continue };
            match min_idx {
                None => min_idx = Some(idx),
                Some(best) if v < cursors[best].current.as_ref().unwrap() => min_idx = Some(idx),
                Some(_) => {}
            }
        }
        let Some(idx) = min_idx else { break };
        let label = cursors[idx].current.take().unwrap();
        if last_written.as_deref() != Some(label.as_str()) {
            writeln!(out, "{label}")
                .map_err(|e| DropwatchError::Parser(format!("writing merged parse output: {e}")))?;
            count += 1;
            last_written = Some(label);
        }
        cursors[idx].current = cursors[idx]
            .lines
            .next()
            .transpose()
            .map_err(|e| DropwatchError::Parser(format!("reading parse run: {e}")))?;
    }

    out.flush()
        .map_err(|e| DropwatchError::Parser(format!("flushing merged parse output: {e}")))?;
    out_guard.0.clear();
    Ok((out_path, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn labels_set(set: &LabelSet) -> HashSet<String> {
        match set {
            LabelSet::Memory(s) => s.clone(),
            LabelSet::Spilled { .. } => set
                .sorted_stream()
                .unwrap()
                .map(|r| r.unwrap())
                .collect(),
        }
    }

    #[test]
    fn basic_owner_names() {
        let data = "alpha.dev. 3600 IN NS ns1.example.\nbeta.dev. 3600 IN NS ns1.example.\n";
        let labels = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        assert_eq!(labels_set(&labels), HashSet::from(["alpha".to_string(), "beta".to_string()]));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let data = "; this is a comment\n\nalpha.dev. NS ns1.example.\n";
        let labels = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        assert_eq!(labels_set(&labels), HashSet::from(["alpha".to_string()]));
    }

    #[test]
    fn origin_directive_changes_relative_names() {
        let data = "$ORIGIN dev.\nalpha NS ns1.example.\n$ORIGIN other.\nbeta NS ns1.example.\n";
        let labels = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        assert_eq!(labels_set(&labels), HashSet::from(["alpha".to_string()]));
    }

    #[test]
    fn idn_and_hyphenated_labels_accepted() {
        let data = "xn--caf-dma.org. NS ns1.\nco-op.org. NS ns1.\n";
        let labels = parse_labels(Cursor::new(data), "org", DEFAULT_MEMORY_BUDGET).unwrap();
        assert_eq!(
            labels_set(&labels),
            HashSet::from(["xn--caf-dma".to_string(), "co-op".to_string()])
        );
    }

    #[test]
    fn three_label_names_skipped() {
        let data = "www.alpha.dev. NS ns1.\n";
        let labels = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn duplicate_owner_names_deduplicated() {
        let data = "alpha.dev. NS ns1.\nalpha.dev. NS ns2.\n";
        let labels = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn order_independence() {
        let forward = "alpha.dev. NS ns1.\nbeta.dev. NS ns1.\ngamma.dev. NS ns1.\n";
        let shuffled = "gamma.dev. NS ns1.\nalpha.dev. NS ns1.\nbeta.dev. NS ns1.\n";
        assert_eq!(
            labels_set(&parse_labels(Cursor::new(forward), "dev", DEFAULT_MEMORY_BUDGET).unwrap()),
            labels_set(&parse_labels(Cursor::new(shuffled), "dev", DEFAULT_MEMORY_BUDGET).unwrap())
        );
    }

    /// A budget of 1 forces a spill on every single label, exercising the
    /// multi-run merge path rather than the single-run shortcut.
    #[test]
    fn tiny_budget_forces_spill_and_merge() {
        let data = "alpha.dev. NS ns1.\nbeta.dev. NS ns1.\nalpha.dev. NS ns2.\ngamma.dev. NS ns1.\n";
        let labels = parse_labels(Cursor::new(data), "dev", 1).unwrap();
        assert!(matches!(labels, LabelSet::Spilled { .. }));
        assert_eq!(labels.len(), 3);
        assert_eq!(
            labels_set(&labels),
            HashSet::from(["alpha".to_string(), "beta".to_string(), "gamma".to_string()])
        );
    }

    #[test]
    fn spilled_and_in_memory_agree_on_same_input() {
        let data = "a.dev. NS ns1.\nb.dev. NS ns1.\nc.dev. NS ns1.\nd.dev. NS ns1.\n";
        let in_memory = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        let spilled = parse_labels(Cursor::new(data), "dev", 1).unwrap();
        assert_eq!(labels_set(&in_memory), labels_set(&spilled));
    }

    /// A malformed UTF-8 byte sequence on one line must not abort the parse
    /// of an otherwise-valid file; it's lossily decoded to `U+FFFD` and that
    /// line simply fails `extract_sld`'s grammar check.
    #[test]
    fn invalid_utf8_line_does_not_abort_parse() {
        let mut data = b"alpha.dev. NS ns1.\n".to_vec();
        data.extend_from_slice(b"\xff\xfe garbage NS ns1.\n");
        data.extend_from_slice(b"beta.dev. NS ns1.\n");
        let labels = parse_labels(Cursor::new(data), "dev", DEFAULT_MEMORY_BUDGET).unwrap();
        assert_eq!(labels_set(&labels), HashSet::from(["alpha".to_string(), "beta".to_string()]));
    }
}
