//! Basename (URL slug) utilities.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Used when a title yields no usable characters.
const FALLBACK_BASENAME: &str = "page";

/// Smallest length cap [`unique_basename`] honours. Matches the config
/// schema minimum.
pub const MIN_BASENAME_LENGTH: usize = 8;

/// Turns a title into a basename: accents folded, markup stripped,
/// lowercased, separators mapped to '-', everything outside `[a-z0-9-]`
/// dropped.
pub fn create_basename(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut in_tag = false;

    for c in input.nfkd().filter(|c| !is_combining_mark(*c)) {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            ' ' | '.' | '/' | '-' | '_' => {
                if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            _ => {
                for lower in c.to_lowercase() {
                    if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
                        slug.push(lower);
                    }
                }
            }
        }
    }

    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        FALLBACK_BASENAME.to_string()
    } else {
        slug.to_string()
    }
}

/// Allocates a basename for `input` that `taken` reports as free, appending
/// `-1`, `-2`, ... on conflict.
///
/// `max_len` is raised to [`MIN_BASENAME_LENGTH`] so a counter suffix always
/// fits; the result never exceeds the raised cap.
pub fn unique_basename<F, E>(input: &str, max_len: usize, mut taken: F) -> Result<String, E>
where
    F: FnMut(&str) -> Result<bool, E>,
{
    let max_len = max_len.max(MIN_BASENAME_LENGTH);
    let base = create_basename(input);
    let base = truncate(&base, max_len);

    if !taken(base)? {
        return Ok(base.to_string());
    }

    let mut n: u32 = 1;
    loop {
        let suffix = format!("-{}", n);
        if suffix.len() >= max_len {
            // Every shorter candidate is taken; fall back to the counter alone.
            let bare = n.to_string();
            if !taken(&bare)? {
                return Ok(bare);
            }
            n += 1;
            continue;
        }
        let stem = truncate(base, max_len.saturating_sub(suffix.len()));
        let candidate = format!("{}{}", stem, suffix);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn truncate(slug: &str, max_len: usize) -> &str {
    // Slugs are ASCII, so byte slicing is safe.
    let cut = &slug[..slug.len().min(max_len)];
    cut.trim_end_matches('-')
}
