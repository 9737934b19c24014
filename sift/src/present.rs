//! Handoff to the rendering layer.
//!
//! Flattens a `ResultPage` into ordered rows. No reordering, filtering or
//! formatting happens here.

use crate::interface::ResultPage;
use serde::Serialize;

/// One row ready for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    /// 1-based position within the full result list
    pub position: usize,
    pub document_id: i64,
    pub relative_score: f64,
    pub raw_score: f64,
    pub timestamp: Option<i64>,
}

impl ResultRow {
    /// Relative score as a whole percentage, as shown next to each result
    pub fn relevance_percent(&self) -> u8 {
        (self.relative_score * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

pub fn assemble(page: &ResultPage) -> Vec<ResultRow> {
    page.rows
        .iter()
        .enumerate()
        .map(|(i, row)| ResultRow {
            position: page.offset + i + 1,
            document_id: row.document_id,
            relative_score: row.relative_score,
            raw_score: row.raw_score,
            timestamp: row.timestamp,
        })
        .collect()
}
