//! Output file naming
//!
//! Turns an item's index and prompt into a short, filesystem-safe name such
//! as `003-red-fox-in-snow.png`.

use pixforge_core::ImageFormat;

/// Longest slug kept in a filename
pub const MAX_SLUG_LEN: usize = 50;

const FALLBACK_SLUG: &str = "image";

/// Reduce a prompt to a lowercase, hyphen-separated slug.
///
/// Only ASCII letters and digits survive; punctuation is dropped rather than
/// replaced, whitespace runs become a single `-`. Never empty and never longer
/// than [`MAX_SLUG_LEN`].
pub fn sanitize(prompt: &str) -> String {
    let kept: String = prompt
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();

    let slug = kept.split_whitespace().collect::<Vec<_>>().join("-");
    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    // The cut can land right after a separator
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// `{index:03}-{slug}.{ext}`
pub fn generate_filename(index: u32, prompt: &str, format: ImageFormat) -> String {
    format!("{:03}-{}.{}", index, sanitize(prompt), format.extension())
}

/// Shorten `text` to `max_len` characters, ending in "..." when cut
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let head: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", head)
}
