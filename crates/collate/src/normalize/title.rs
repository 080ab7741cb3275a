//! Title folding.
//!
//! The folded form is a similarity key: two titles that differ only in
//! case, accents, punctuation, spacing or a leading article fold to the same
//! string. Typos are left alone; those are the near-duplicate pass's job.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Leading articles dropped from titles (English, Spanish, Portuguese,
/// French, Italian, German).
const LEADING_ARTICLES: &[&str] = &[
    "the", "a", "an", "el", "la", "los", "las", "lo", "o", "os", "as", "le", "les", "l", "il",
    "gli", "un", "una", "der", "die", "das",
];

/// Fold a title. Returns an empty string when nothing comparable remains.
pub fn fold(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len());
    for ch in raw.nfd().filter(|c| !is_combining_mark(*c)) {
        if ch == '&' {
            spaced.push_str(" and ");
        } else if ch.is_alphanumeric() {
            spaced.extend(ch.to_lowercase());
        } else {
            spaced.push(' ');
        }
    }

    let words: Vec<&str> = spaced.split_whitespace().collect();
    let start = match words.as_slice() {
        [first, _, ..] if LEADING_ARTICLES.contains(first) => 1,
        _ => 0,
    };
    words[start..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_spacing_and_punctuation() {
        assert_eq!(fold("  Journal   of Biology. "), "journal of biology");
        assert_eq!(fold("JOURNAL OF BIOLOGY"), "journal of biology");
        assert_eq!(fold("Journal: of -- Biology"), "journal of biology");
    }

    #[test]
    fn test_diacritics_folded() {
        assert_eq!(fold("Revista Médica de Chile"), "revista medica de chile");
        assert_eq!(fold("Zeitschrift für Naturforschung"), "zeitschrift fur naturforschung");
    }

    #[test]
    fn test_leading_article_stripped() {
        assert_eq!(fold("The Lancet"), fold("Lancet"));
        assert_eq!(fold("L'Année psychologique"), "annee psychologique");
        assert_eq!(fold("El Trimestre Económico"), "trimestre economico");
    }

    #[test]
    fn test_lone_article_is_kept() {
        assert_eq!(fold("The"), "the");
    }

    #[test]
    fn test_ampersand_spelled_out() {
        assert_eq!(fold("Science & Society"), fold("Science and Society"));
    }

    #[test]
    fn test_nothing_comparable() {
        assert_eq!(fold(" -- ... "), "");
    }
}
