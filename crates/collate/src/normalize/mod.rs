//! Canonical comparison keys for raw cell values.
//!
//! [`normalize`] is a pure function of the raw value and its [`FieldType`]:
//! it never looks at other records, so equal keys can be treated as an
//! equivalence relation by the matcher.
//!
//! # Example
//!
//! ```
//! use collate::normalize::{normalize, FieldType};
//!
//! let a = normalize("1234-5678", FieldType::Issn).unwrap();
//! let b = normalize("12345678", FieldType::Eissn).unwrap();
//! assert_eq!(a, b);
//! ```

pub mod issn;
pub mod title;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input::DataTable;

/// The kind of value a key column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Print ISSN.
    Issn,
    /// Electronic ISSN.
    Eissn,
    /// Publication title.
    Title,
    /// Any other column; compared trimmed and lowercased.
    Generic,
}

impl FieldType {
    /// The key namespace this field type produces keys in.
    ///
    /// Print and electronic ISSNs share one namespace: a title's E-ISSN in
    /// one file may well sit in the ISSN column of another.
    pub fn namespace(self) -> KeyNamespace {
        match self {
            FieldType::Issn | FieldType::Eissn => KeyNamespace::Issn,
            FieldType::Title => KeyNamespace::Title,
            FieldType::Generic => KeyNamespace::Generic,
        }
    }

    /// Guess the field type of a spreadsheet header.
    ///
    /// Returns `None` for headers that do not clearly name an ISSN or title
    /// column; [`FieldType::Generic`] is never inferred.
    pub fn from_header(header: &str) -> Option<Self> {
        let folded: String = title::fold(header).split_whitespace().collect();
        match folded.as_str() {
            "eissn" | "electronicissn" | "onlineissn" | "issnelectronico" | "issnonline"
            | "issnelectronic" => Some(FieldType::Eissn),
            "issn" | "printissn" | "pissn" | "issnimpreso" | "issnprint" | "issnl" => {
                Some(FieldType::Issn)
            }
            "title" | "titulo" | "journal" | "journaltitle" | "sourcetitle" | "revista"
            | "nombrerevista" | "publicationtitle" | "journalname" => Some(FieldType::Title),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Issn => write!(f, "issn"),
            FieldType::Eissn => write!(f, "eissn"),
            FieldType::Title => write!(f, "title"),
            FieldType::Generic => write!(f, "generic"),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "issn" | "pissn" => Ok(FieldType::Issn),
            "eissn" => Ok(FieldType::Eissn),
            "title" => Ok(FieldType::Title),
            "generic" => Ok(FieldType::Generic),
            _ => Err(format!(
                "Unknown field type: {}. Use: issn, eissn, title, or generic.",
                s
            )),
        }
    }
}

/// Which comparison space a key lives in. Keys from different namespaces
/// never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyNamespace {
    /// Reserved for missing values.
    Empty,
    Issn,
    Title,
    Generic,
}

/// Canonical comparable form of a cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedKey {
    namespace: KeyNamespace,
    value: String,
}

impl NormalizedKey {
    /// The reserved key for missing values. The matcher never groups two
    /// records on it.
    pub fn empty() -> Self {
        Self {
            namespace: KeyNamespace::Empty,
            value: String::new(),
        }
    }

    /// Build a key from an already-canonical value.
    pub fn new(namespace: KeyNamespace, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() || namespace == KeyNamespace::Empty {
            return Self::empty();
        }
        Self { namespace, value }
    }

    pub fn is_empty(&self) -> bool {
        self.namespace == KeyNamespace::Empty
    }

    pub fn namespace(&self) -> KeyNamespace {
        self.namespace
    }

    /// The canonical value, e.g. `12345678` or `journal of biology`.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The value as an external catalog expects it. ISSNs get their hyphen
    /// back; other namespaces are returned unchanged.
    pub fn display_value(&self) -> String {
        match self.namespace {
            KeyNamespace::Issn => issn::display_form(&self.value),
            _ => self.value.clone(),
        }
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            KeyNamespace::Empty => write!(f, "(empty)"),
            KeyNamespace::Issn => write!(f, "{}", issn::display_form(&self.value)),
            KeyNamespace::Title | KeyNamespace::Generic => write!(f, "{}", self.value),
        }
    }
}

/// A value that could not be turned into a key. Recovered locally: the row
/// is kept as an unmatched record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },
}

/// Canonicalize `value` as a `field_type` key.
///
/// Missing values (empty or null-like cells) normalize to
/// [`NormalizedKey::empty`] rather than failing.
pub fn normalize(value: &str, field_type: FieldType) -> Result<NormalizedKey, NormalizationError> {
    if DataTable::is_null_value(value) {
        return Ok(NormalizedKey::empty());
    }

    let namespace = field_type.namespace();
    let canonical = match field_type {
        FieldType::Issn | FieldType::Eissn => issn::canonicalize(value)?,
        FieldType::Title => title::fold(value),
        FieldType::Generic => value.trim().to_lowercase(),
    };
    Ok(NormalizedKey::new(namespace, canonical))
}

/// Like [`normalize`], for a cell that may be absent from the row entirely.
pub fn normalize_cell(
    value: Option<&str>,
    field_type: FieldType,
) -> Result<NormalizedKey, NormalizationError> {
    match value {
        Some(v) => normalize(v, field_type),
        None => Ok(NormalizedKey::empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issn_and_eissn_share_namespace() {
        let print = normalize("0028-0836", FieldType::Issn).unwrap();
        let online = normalize("00280836", FieldType::Eissn).unwrap();
        assert_eq!(print, online);
        assert_eq!(print.to_string(), "0028-0836");
    }

    #[test]
    fn test_title_and_generic_do_not_collide() {
        let title = normalize("nature", FieldType::Title).unwrap();
        let generic = normalize("Nature", FieldType::Generic).unwrap();
        assert_eq!(title.value(), generic.value());
        assert_ne!(title, generic);
    }

    #[test]
    fn test_missing_values_are_empty_keys() {
        for v in ["", "   ", "NaN", "N/A"] {
            for ft in [FieldType::Issn, FieldType::Title, FieldType::Generic] {
                assert!(normalize(v, ft).unwrap().is_empty());
            }
        }
        assert!(normalize_cell(None, FieldType::Title).unwrap().is_empty());
    }

    #[test]
    fn test_title_folding_to_nothing_is_empty() {
        assert!(normalize("???", FieldType::Title).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_issn_is_an_error() {
        let err = normalize("not an issn", FieldType::Issn).unwrap_err();
        assert!(matches!(err, NormalizationError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_generic_trims_and_lowercases_only() {
        let key = normalize("  ABC-12 ", FieldType::Generic).unwrap();
        assert_eq!(key.value(), "abc-12");
    }

    #[test]
    fn test_field_type_from_header() {
        assert_eq!(FieldType::from_header("ISSN"), Some(FieldType::Issn));
        assert_eq!(FieldType::from_header("Print ISSN"), Some(FieldType::Issn));
        assert_eq!(FieldType::from_header("E-ISSN"), Some(FieldType::Eissn));
        assert_eq!(FieldType::from_header("Online ISSN"), Some(FieldType::Eissn));
        assert_eq!(FieldType::from_header("Título"), Some(FieldType::Title));
        assert_eq!(FieldType::from_header("Source title"), Some(FieldType::Title));
        assert_eq!(FieldType::from_header("Publisher"), None);
    }

    #[test]
    fn test_field_type_from_str() {
        assert_eq!("E-ISSN".parse::<FieldType>().unwrap(), FieldType::Eissn);
        assert_eq!("title".parse::<FieldType>().unwrap(), FieldType::Title);
        assert!("isbn".parse::<FieldType>().is_err());
    }
}
