//! Text Error Metric Service
//!
//! Computes an edit-distance-based error rate between an original and a
//! corrected transcript span, used as the primary quality signal.
//!
//! # Algorithm
//! - Levenshtein dynamic program over whitespace tokens, with the backtrace
//!   classifying each edit as insertion, deletion, or substitution
//! - Optional second pass detects block moves: a contiguous token run
//!   deleted from one position and inserted unchanged elsewhere collapses
//!   from its insert+delete pairs into a single "move" operation
//! - `error_rate = total_operations / max(1, original_len)`; an empty
//!   original with a non-empty correction rates 1.0, empty/empty rates 0.0
//!
//! Pure and deterministic: identical inputs always produce identical output.

use crate::config::MetricThresholds;
use serde::{Deserialize, Serialize};

/// Quality classification derived from the error rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    High,
    Medium,
    Low,
}

impl QualityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityClass::High => "high",
            QualityClass::Medium => "medium",
            QualityClass::Low => "low",
        }
    }
}

/// Result of comparing an original span against its correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetric {
    pub insertions: u32,
    pub deletions: u32,
    pub substitutions: u32,
    pub moves: u32,
    /// insertions + deletions + substitutions + moves
    pub total_operations: u32,
    pub original_token_count: u32,
    pub corrected_token_count: u32,
    pub error_rate: f64,
    pub quality: QualityClass,
}

/// One edit from the alignment backtrace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditOp {
    Insert { corr_idx: usize },
    Delete { orig_idx: usize },
    Substitute,
}

/// Text error metric calculator
///
/// Classification thresholds are injected configuration, not hard-coded
/// business law.
#[derive(Debug, Clone)]
pub struct TextErrorMetric {
    thresholds: MetricThresholds,
    detect_moves: bool,
}

impl TextErrorMetric {
    pub fn new(thresholds: MetricThresholds) -> Self {
        Self {
            thresholds,
            detect_moves: true,
        }
    }

    /// Disable the block-move second pass (plain Levenshtein counting)
    pub fn without_move_detection(thresholds: MetricThresholds) -> Self {
        Self {
            thresholds,
            detect_moves: false,
        }
    }

    /// Compare two text spans, tokenizing on whitespace
    pub fn compute(&self, original: &str, corrected: &str) -> ErrorMetric {
        let original_tokens: Vec<&str> = original.split_whitespace().collect();
        let corrected_tokens: Vec<&str> = corrected.split_whitespace().collect();
        self.compute_tokens(&original_tokens, &corrected_tokens)
    }

    /// Compare two pre-tokenized sequences
    pub fn compute_tokens(&self, original: &[&str], corrected: &[&str]) -> ErrorMetric {
        let m = original.len();
        let n = corrected.len();

        let ops = align(original, corrected);

        let mut insertions = ops
            .iter()
            .filter(|op| matches!(op, EditOp::Insert { .. }))
            .count() as u32;
        let mut deletions = ops
            .iter()
            .filter(|op| matches!(op, EditOp::Delete { .. }))
            .count() as u32;
        let substitutions = ops.iter().filter(|op| matches!(op, EditOp::Substitute)).count() as u32;

        let moves = if self.detect_moves {
            let (move_count, moved_tokens) = detect_block_moves(&ops, original, corrected);
            insertions -= moved_tokens;
            deletions -= moved_tokens;
            move_count
        } else {
            0
        };

        let total_operations = insertions + deletions + substitutions + moves;

        let error_rate = if m == 0 {
            // Guard against division by zero: a correction conjured out of
            // nothing is maximal error, nothing-to-nothing is none
            if n == 0 {
                0.0
            } else {
                1.0
            }
        } else {
            total_operations as f64 / m as f64
        };

        let quality = if error_rate <= self.thresholds.high_max_error_rate {
            QualityClass::High
        } else if error_rate <= self.thresholds.medium_max_error_rate {
            QualityClass::Medium
        } else {
            QualityClass::Low
        };

        ErrorMetric {
            insertions,
            deletions,
            substitutions,
            moves,
            total_operations,
            original_token_count: m as u32,
            corrected_token_count: n as u32,
            error_rate,
            quality,
        }
    }
}

impl Default for TextErrorMetric {
    fn default() -> Self {
        Self::new(MetricThresholds::default())
    }
}

/// Minimum-edit-distance alignment with per-edit classification
fn align(original: &[&str], corrected: &[&str]) -> Vec<EditOp> {
    let m = original.len();
    let n = corrected.len();

    // dp[i][j] = minimum edits to turn original[..i] into corrected[..j]
    let mut dp = vec![vec![0u32; n + 1]; m + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i as u32;
    }
    for j in 0..=n {
        dp[0][j] = j as u32;
    }

    for i in 1..=m {
        for j in 1..=n {
            if original[i - 1] == corrected[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            } else {
                let substitute = dp[i - 1][j - 1];
                let delete = dp[i - 1][j];
                let insert = dp[i][j - 1];
                dp[i][j] = 1 + substitute.min(delete).min(insert);
            }
        }
    }

    // Backtrace, preferring matches, then substitution, deletion, insertion
    let mut ops = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && original[i - 1] == corrected[j - 1] && dp[i][j] == dp[i - 1][j - 1] {
            i -= 1;
            j -= 1;
        } else if i > 0 && j > 0 && dp[i][j] == dp[i - 1][j - 1] + 1 {
            ops.push(EditOp::Substitute);
            i -= 1;
            j -= 1;
        } else if i > 0 && dp[i][j] == dp[i - 1][j] + 1 {
            ops.push(EditOp::Delete { orig_idx: i - 1 });
            i -= 1;
        } else {
            ops.push(EditOp::Insert { corr_idx: j - 1 });
            j -= 1;
        }
    }
    ops.reverse();
    ops
}

/// Detect block moves among the classified edits
///
/// Groups deletions and insertions into maximal contiguous runs and pairs a
/// deletion run with the first unused insertion run carrying the identical
/// token sequence. Each pair counts as one move.
///
/// Returns `(move_count, tokens_absorbed_per_side)`: the paired runs'
/// token count is subtracted from both the insertion and deletion tallies.
fn detect_block_moves(ops: &[EditOp], original: &[&str], corrected: &[&str]) -> (u32, u32) {
    let deletion_runs = contiguous_runs(ops.iter().filter_map(|op| match op {
        EditOp::Delete { orig_idx } => Some(*orig_idx),
        _ => None,
    }));
    let insertion_runs = contiguous_runs(ops.iter().filter_map(|op| match op {
        EditOp::Insert { corr_idx } => Some(*corr_idx),
        _ => None,
    }));

    let mut move_count = 0u32;
    let mut moved_tokens = 0u32;
    let mut used_insertion = vec![false; insertion_runs.len()];

    for del_run in &deletion_runs {
        let deleted: &[&str] = &original[del_run.0..=del_run.1];
        for (idx, ins_run) in insertion_runs.iter().enumerate() {
            if used_insertion[idx] {
                continue;
            }
            let inserted: &[&str] = &corrected[ins_run.0..=ins_run.1];
            if deleted == inserted {
                used_insertion[idx] = true;
                move_count += 1;
                moved_tokens += deleted.len() as u32;
                break;
            }
        }
    }

    (move_count, moved_tokens)
}

/// Collapse a sorted index iterator into (start, end) inclusive runs
fn contiguous_runs(indices: impl Iterator<Item = usize>) -> Vec<(usize, usize)> {
    let mut sorted: Vec<usize> = indices.collect();
    sorted.sort_unstable();

    let mut runs = Vec::new();
    for idx in sorted {
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == idx => *end = idx,
            _ => runs.push((idx, idx)),
        }
    }
    runs
}
