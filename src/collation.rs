//! Title ordering shared by SQL and in-memory sorts: case-insensitive, with
//! accented letters sorted next to their base letters.

use std::cmp::Ordering;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Registered on every pooled connection; use as `COLLATE places_title`.
pub const TITLE_COLLATION: &str = "places_title";

fn base_letters(s: &str) -> impl Iterator<Item = char> + '_ {
    s.nfkd().filter(|c| !is_combining_mark(*c)).flat_map(char::to_lowercase)
}

fn folded(s: &str) -> impl Iterator<Item = char> + '_ {
    s.nfkd().flat_map(char::to_lowercase)
}

/// Base letters decide first, then accents, then case.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    base_letters(a)
        .cmp(base_letters(b))
        .then_with(|| folded(a).cmp(folded(b)))
        .then_with(|| a.cmp(b))
}
