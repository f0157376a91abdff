//! Shared utility functions for the Foreman crate.

/// Truncate `s` to at most `max_len` bytes (on a char boundary), appending
/// `...` when anything was cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Like [`truncate`], but the result including the ellipsis fits in
/// `max_len` bytes. Used for short labels.
pub fn truncate_label(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        truncate(s, max_len.saturating_sub(3))
    }
}
