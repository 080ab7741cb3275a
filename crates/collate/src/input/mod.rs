//! Loading spreadsheet exports into records.
//!
//! Spreadsheet parsing proper belongs to the caller; this module only covers
//! delimited-text exports so the CLI and tests have something to feed the
//! matcher with.

mod parser;
mod record;
mod source;

pub use parser::{ParserConfig, TableParser};
pub use record::{Dataset, Record};
pub use source::{DataTable, SourceMetadata};
