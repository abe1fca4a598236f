//! Pure aggregation over terminal cell results: composite score, best-answer
//! selection, correction banner policy, and the speech-summary text fed to
//! narration.
//!
//! Everything here is a total function over already-collected state; nothing
//! does I/O, so partial failures upstream simply shrink the input set.

use crate::events::AnswerResult;
use crate::session::{CellState, Correction};

/// Per-segment character budget for truncated display/speech fragments.
pub const SEGMENT_MAX_CHARS: usize = 40;
/// Character budget for one side of the correction diff banner.
pub const BANNER_SEGMENT_MAX_CHARS: usize = 80;
/// Total character budget for a speech summary.
pub const SUMMARY_MAX_CHARS: usize = 300;

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// The best result among a slot's cells: highest `ai_score`, ties keeping the
/// first encountered in the given order.
pub fn best_result<'a>(cells: &[&'a CellState]) -> Option<&'a AnswerResult> {
    let mut best: Option<&AnswerResult> = None;
    for cell in cells {
        if let Some(result) = cell.result.as_ref() {
            match best {
                Some(current) if result.ai_score <= current.ai_score => {}
                _ => best = Some(result),
            }
        }
    }
    best
}

/// Composite score for a slot.
///
/// A server-computed composite takes precedence. Otherwise the arithmetic
/// mean of `ai_score` over cells with a result, rounded half-up. `None` (not
/// zero) when no cell produced a result.
pub fn composite_score(cells: &[&CellState], server: Option<u32>) -> Option<u32> {
    if let Some(value) = server {
        return Some(value);
    }
    let scores: Vec<u32> = cells
        .iter()
        .filter_map(|c| c.result.as_ref().map(|r| r.ai_score))
        .collect();
    if scores.is_empty() {
        return None;
    }
    let sum: u64 = scores.iter().map(|&s| u64::from(s)).sum();
    let mean = sum as f64 / scores.len() as f64;
    Some(mean.round() as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Display band for a score: 90+ excellent, 70+ good, 50+ fair, below poor.
pub fn score_band(score: u32) -> ScoreBand {
    match score {
        90.. => ScoreBand::Excellent,
        70..=89 => ScoreBand::Good,
        50..=69 => ScoreBand::Fair,
        _ => ScoreBand::Poor,
    }
}

// ---------------------------------------------------------------------------
// Correction banner
// ---------------------------------------------------------------------------

/// What a slot's correction banner should show.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionBanner {
    /// No correction event arrived.
    Hidden,
    /// A correction event arrived with `corrected: null`.
    NoCorrectionNeeded,
    /// Original vs corrected text, each truncated independently.
    Diff { original: String, corrected: String },
}

pub fn correction_banner(correction: Option<&Correction>) -> CorrectionBanner {
    match correction {
        None => CorrectionBanner::Hidden,
        Some(Correction { corrected: None, .. }) => CorrectionBanner::NoCorrectionNeeded,
        Some(Correction { original, corrected: Some(corrected) }) => CorrectionBanner::Diff {
            original: truncate_ellipsis(original, BANNER_SEGMENT_MAX_CHARS),
            corrected: truncate_ellipsis(corrected, BANNER_SEGMENT_MAX_CHARS),
        },
    }
}

// ---------------------------------------------------------------------------
// Speech summary
// ---------------------------------------------------------------------------

/// Deterministic narration text for one slot's finished round.
///
/// Composed, in order, from: the user label and composite score, a
/// comma-joined "model: score" line, up to two highlight points, up to two
/// missing points, and one suggestion (all drawn from the best result). Empty
/// source fields are omitted. `None` when no cell produced a result.
pub fn speech_summary(
    user_label: &str,
    cells: &[&CellState],
    server_composite: Option<u32>,
) -> Option<String> {
    let composite = composite_score(cells, server_composite)?;
    let best = best_result(cells)?;

    let mut parts = vec![format!("{} scored {} overall.", user_label, composite)];

    let per_model = model_score_line(cells);
    if !per_model.is_empty() {
        parts.push(format!("Model scores: {}.", per_model));
    }

    let highlights: Vec<String> = best
        .ai_highlights
        .iter()
        .filter(|h| !h.trim().is_empty())
        .take(2)
        .map(|h| truncate_ellipsis(h.trim(), SEGMENT_MAX_CHARS))
        .collect();
    if !highlights.is_empty() {
        parts.push(format!("Strengths: {}.", highlights.join("; ")));
    }

    let missing: Vec<String> = best
        .ai_missing_points
        .iter()
        .filter(|m| !m.trim().is_empty())
        .take(2)
        .map(|m| truncate_ellipsis(m.trim(), SEGMENT_MAX_CHARS))
        .collect();
    if !missing.is_empty() {
        parts.push(format!("Missing: {}.", missing.join("; ")));
    }

    if !best.ai_suggestion.trim().is_empty() {
        parts.push(format!(
            "Suggestion: {}.",
            truncate_ellipsis(best.ai_suggestion.trim(), SEGMENT_MAX_CHARS)
        ));
    }

    Some(truncate_ellipsis(&parts.join(" "), SUMMARY_MAX_CHARS))
}

/// Comma-joined `"model: score"` line over cells with a result, in the given
/// cell order.
pub fn model_score_line(cells: &[&CellState]) -> String {
    cells
        .iter()
        .filter_map(|c| c.result.as_ref())
        .map(|r| {
            let name = if r.ai_model_name.is_empty() { "model" } else { &r.ai_model_name };
            format!("{}: {}", name, r.ai_score)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cut `text` to at most `max_chars` characters, replacing the tail with `…`.
/// Counts characters, never bytes, so multi-byte text is cut cleanly.
pub fn truncate_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
