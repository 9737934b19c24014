//! Relative scoring and page windows
//!
//! Relative scores compare each row to the best row of the whole MatchSet,
//! so they are stable across pages. Windows are inclusive index ranges that
//! may be empty but are never out of range.

use crate::interface::{MatchSet, RawMatch, ScoredMatch};

/// Highest raw score, or 0 for an empty list
pub fn top_score(matches: &[RawMatch]) -> f64 {
    matches.iter().map(|m| m.score).fold(0.0, f64::max)
}

/// `raw_score / top_score`, clamped to [0, 1]; 0 when `top_score` is not positive
pub fn relative_score(raw_score: f64, top_score: f64) -> f64 {
    if top_score > 0.0 && raw_score.is_finite() {
        (raw_score / top_score).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Inclusive index range of one page; `end < start` means no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub start: i64,
    pub end: i64,
}

impl PageWindow {
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice `items` to this window; never panics
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        if self.is_empty() {
            return &[];
        }
        let start = (self.start as usize).min(items.len());
        let end = ((self.end + 1) as usize).min(items.len());
        &items[start..end]
    }
}

/// Window for `limit` rows starting at `requested_offset`.
///
/// `start = max(offset, 0)`, `end = min(start + limit - 1, total_rows - 1)`.
pub fn page_window(total_rows: usize, limit: usize, requested_offset: i64) -> PageWindow {
    if total_rows == 0 || limit == 0 {
        return PageWindow { start: 0, end: -1 };
    }
    let start = requested_offset.max(0);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let last_row = i64::try_from(total_rows).unwrap_or(i64::MAX) - 1;
    let end = start.saturating_add(limit - 1).min(last_row);
    PageWindow { start, end }
}

/// Score the rows of `set` that fall in `window`
pub fn score_window(set: &MatchSet, window: PageWindow) -> Vec<ScoredMatch> {
    let top = set.top_score();
    window
        .slice(&set.matches)
        .iter()
        .map(|m| ScoredMatch {
            document_id: m.id,
            raw_score: m.score,
            relative_score: relative_score(m.score, top),
            timestamp: m.timestamp,
        })
        .collect()
}
