//! Topic-safe path segments from human-readable names

/// Lowercase, hyphen-separated segment for a controller entity name
///
/// Keeps ASCII letters, digits and `-`. Whitespace runs become a single `-`,
/// everything else (including `/`, `+` and `#`) is dropped.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.trim().chars() {
        if c.is_whitespace() {
            pending_separator = true;
            continue;
        }

        if !(c.is_ascii_alphanumeric() || c == '-') {
            continue;
        }

        if pending_separator && !out.is_empty() {
            out.push('-');
        }
        pending_separator = false;
        out.push(c.to_ascii_lowercase());
    }

    out
}
