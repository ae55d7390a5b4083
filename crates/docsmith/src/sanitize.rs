//! Helpers for keeping sensitive or unbounded data out of logs and spans.
//!
//! Span fields never carry full paths or secrets, and raw sandbox output is
//! only ever quoted through a bounded excerpt.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Token shapes handed out by the repository host and the generation API,
/// plus bearer headers echoed by HTTP tooling.
static CREDENTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:gh[pousr]_[A-Za-z0-9]{16,}|github_pat_[A-Za-z0-9_]{20,}|sk-[A-Za-z0-9_-]{16,})|(?i:bearer)\s+[A-Za-z0-9._~+/=-]{12,}",
    )
    .unwrap()
});

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks a secret, keeping a short prefix so operators can tell keys apart.
///
/// - `ghp_abcdef123456` → `ghp_****`
/// - short values are masked entirely
pub fn redact_secret(secret: &str) -> String {
    const VISIBLE: usize = 4;
    if secret.chars().count() <= VISIBLE * 2 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE).collect();
    format!("{prefix}****")
}

/// Removes every occurrence of each secret from `text`.
pub fn scrub(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, secret| acc.replace(secret, "****"))
}

/// Masks anything shaped like a credential, for text whose secrets are not
/// known up front (upstream error bodies, third-party stderr).
pub fn mask_credentials(text: &str) -> String {
    CREDENTIAL
        .replace_all(text, |caps: &regex::Captures<'_>| redact_secret(&caps[0]))
        .into_owned()
}

/// Bounded stderr for error values: known secrets removed first, then the
/// tail taken, then credential-shaped leftovers masked.
pub fn diagnostic_tail(stderr: &str, secrets: &[&str], max_bytes: usize) -> String {
    mask_credentials(&tail(&scrub(stderr, secrets), max_bytes))
}

/// The first `max_bytes` of `text`, cut on a char boundary, with a marker
/// when anything was dropped.
pub fn excerpt(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [{} bytes omitted]", &text[..end], text.len() - end)
}

/// The last `max_bytes` of `text`, cut on a char boundary. Diagnostics
/// usually live at the end of stderr.
pub fn tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[{} bytes omitted] …{}", start, &text[start..])
}
