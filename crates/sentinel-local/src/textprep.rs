//! Minimal, deterministic text normalization for matching and hashing.
//!
//! Lossy by construction: output is only used as a matching key, never for display.

/// Lowercase, and treat every non-alphanumeric run as a single space.
pub fn scrub(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Scrubbed tokens of at least two characters, in document order.
pub fn tokens(s: &str) -> Vec<String> {
    scrub(s)
        .split(' ')
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}
