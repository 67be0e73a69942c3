//! Prompt text sanitation.
//!
//! Both the incoming prompt and the decoded model output go through the
//! same normalization: runs of spaces collapse to one space, and commas,
//! periods, spaces and line breaks are stripped from both ends.

/// Default number of collapse passes. Each pass roughly halves a run of
/// spaces, so runs of up to 2^16 spaces collapse completely.
pub const DEFAULT_SANITIZE_PASSES: usize = 16;

/// Characters stripped from both ends of a prompt.
const EDGE_CHARS: [char; 5] = [',', '.', ' ', '\r', '\n'];

/// Sanitizes `text` with the default number of passes.
pub fn safe_str(text: &str) -> String {
    sanitize(text, DEFAULT_SANITIZE_PASSES)
}

/// Collapses double spaces for at most `passes` rounds, then trims edge punctuation.
pub fn sanitize(text: &str, passes: usize) -> String {
    let mut out = text.to_string();
    for _ in 0..passes {
        if !out.contains("  ") {
            break;
        }
        out = out.replace("  ", " ");
    }
    out.trim_matches(EDGE_CHARS.as_slice()).to_string()
}

/// Drops empty strings; yields `[default]` when nothing is left.
pub fn remove_empty_str(items: impl IntoIterator<Item = String>, default: &str) -> Vec<String> {
    let kept: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
    if kept.is_empty() {
        vec![default.to_string()]
    } else {
        kept
    }
}
