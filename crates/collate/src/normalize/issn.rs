//! ISSN canonicalization.
//!
//! An ISSN is seven digits followed by a mod-11 check character (`0`-`9` or
//! `X`). Sources write them as `1234-5678`, `12345678`, `ISSN 1234-5678`, or
//! as a number that lost its leading zeros on the way through a spreadsheet.

use once_cell::sync::Lazy;
use regex::Regex;

use super::NormalizationError;

static ISSN_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{7}[0-9X]$").unwrap());

/// Characters spreadsheets use in place of an ASCII hyphen.
const DASHES: &[char] = &['-', '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}'];

/// Reduce a raw ISSN cell to its eight canonical characters.
///
/// Leading zeros are restored only for bare numbers (`280836`, `280836.0`).
/// A short value written with a separator, such as `1234-567`, is a typo
/// rather than a lost zero and is rejected.
pub fn canonicalize(raw: &str) -> Result<String, NormalizationError> {
    let upper = raw.trim().to_uppercase();
    let body = strip_label(&upper);
    let separated = body
        .chars()
        .any(|c| c.is_whitespace() || DASHES.contains(&c));

    let mut residual: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && !DASHES.contains(c) && *c != ':')
        .collect();

    // Numeric cells exported as floats.
    if let Some(stripped) = residual.strip_suffix(".0") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            residual = stripped.to_string();
        }
    }

    if !separated && (5..8).contains(&residual.len()) && looks_truncated(&residual) {
        residual = format!("{:0>8}", residual);
    }

    if !ISSN_SHAPE.is_match(&residual) {
        return Err(NormalizationError::InvalidIdentifier {
            value: raw.to_string(),
            reason: "expected seven digits followed by a digit or X",
        });
    }

    Ok(residual)
}

/// The part of `upper` after an `ISSN` or `E-ISSN` label, if it has one.
fn strip_label(upper: &str) -> &str {
    let Some(start) = upper.find(|c: char| c.is_ascii_digit()) else {
        return upper;
    };
    let label: String = upper[..start]
        .chars()
        .filter(|c| !c.is_whitespace() && !DASHES.contains(c) && *c != ':')
        .collect();
    if label == "ISSN" || label == "EISSN" {
        &upper[start..]
    } else {
        upper
    }
}

fn looks_truncated(residual: &str) -> bool {
    if !residual.is_ascii() {
        return false;
    }
    let (body, last) = residual.split_at(residual.len() - 1);
    body.chars().all(|c| c.is_ascii_digit())
        && (last == "X" || last.chars().all(|c| c.is_ascii_digit()))
}

/// Whether the eighth character is the correct mod-11 check digit.
///
/// Expects the canonical form produced by [`canonicalize`].
pub fn check_digit_valid(canonical: &str) -> bool {
    let bytes = canonical.as_bytes();
    if bytes.len() != 8 {
        return false;
    }

    let mut sum = 0u32;
    for (i, b) in bytes[..7].iter().enumerate() {
        if !b.is_ascii_digit() {
            return false;
        }
        sum += u32::from(b - b'0') * (8 - i as u32);
    }

    let expected = match (11 - sum % 11) % 11 {
        10 => b'X',
        d => b'0' + d as u8,
    };
    bytes[7] == expected
}

/// `XXXX-XXXX`, the form catalogs index ISSNs under.
pub fn display_form(canonical: &str) -> String {
    if canonical.len() == 8 && canonical.is_ascii() {
        format!("{}-{}", &canonical[..4], &canonical[4..])
    } else {
        canonical.to_string()
    }
}
