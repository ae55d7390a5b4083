use serde::Serialize;

/// A diff as handed to the sandbox, possibly shortened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    /// Lines in the diff before truncation.
    pub line_count: usize,
    pub truncated: bool,
}

/// Shortens `diff` to at most `max_bytes` (plus a marker line), cutting
/// after the last complete line that fits.
pub fn truncate_diff(diff: &str, max_bytes: usize) -> (String, DiffStats) {
    let stats = DiffStats {
        line_count: line_count(diff),
        truncated: diff.len() > max_bytes,
    };
    if !stats.truncated {
        return (diff.to_string(), stats);
    }

    let mut end = max_bytes;
    while !diff.is_char_boundary(end) {
        end -= 1;
    }
    let cut = diff[..end].rfind('\n').map(|idx| idx + 1).unwrap_or(0);
    let kept = &diff[..cut];
    let omitted_lines = stats.line_count - line_count(kept);
    let text = format!(
        "{kept}[diff truncated: {} bytes in {omitted_lines} lines omitted]\n",
        diff.len() - cut
    );
    (text, stats)
}

pub fn line_count(text: &str) -> usize {
    text.lines().count()
}
