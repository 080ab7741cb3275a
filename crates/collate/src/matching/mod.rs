//! Partitioning records from N files into match groups.
//!
//! Records are grouped on exact equality of their effective
//! [`NormalizedKey`]. Every record lands in exactly one group; records with
//! no usable key each get a group of their own. In advanced mode a second
//! pass flags singleton groups from different files whose titles are within
//! a small edit distance. Those pairs are reported next to the groups and
//! never merged into them.

mod columns;
mod duplicates;
mod matcher;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::input::Record;
use crate::normalize::NormalizedKey;

pub use columns::{ColumnMapping, KeyColumn};
pub use matcher::{KeyedRecord, Matcher};

/// Records sharing one normalized key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGroup {
    pub key: NormalizedKey,
    /// Members in the order they were seen.
    pub members: Vec<Arc<Record>>,
    /// Source ids represented, in first-seen order.
    pub presence: IndexSet<String>,
}

impl MatchGroup {
    fn new(key: NormalizedKey, first: Arc<Record>) -> Self {
        let mut presence = IndexSet::new();
        presence.insert(first.source_id().to_string());
        Self {
            key,
            members: vec![first],
            presence,
        }
    }

    fn push(&mut self, record: Arc<Record>) {
        self.presence.insert(record.source_id().to_string());
        self.members.push(record);
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Present in every one of `sources` (and there is more than one).
    pub fn is_common(&self, sources: &IndexSet<String>) -> bool {
        sources.len() > 1 && sources.iter().all(|s| self.presence.contains(s))
    }
}

/// Where a group stands across the input files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Present in every file.
    Common,
    /// Present in more than one file but not all of them.
    Partial(Vec<String>),
    /// Present in a single file.
    Exclusive(String),
    /// A singleton whose title is close to a singleton from another file.
    ProbableDuplicate,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Common => write!(f, "Common"),
            MatchStatus::Partial(sources) => write!(f, "Partial:{}", sources.join("|")),
            MatchStatus::Exclusive(source) => write!(f, "Exclusive:{}", source),
            MatchStatus::ProbableDuplicate => write!(f, "ProbableDuplicate"),
        }
    }
}

/// Two singleton groups from different files with near-identical titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbableDuplicate {
    /// Index into [`MatchOutcome::groups`].
    pub left: usize,
    pub right: usize,
    pub left_title: String,
    pub right_title: String,
    pub distance: usize,
}

/// Non-fatal conditions found while matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchWarning {
    /// The near-duplicate pass was skipped for a file pair.
    SingletonCapExceeded {
        left: String,
        right: String,
        singletons: usize,
        cap: usize,
    },
    /// None of the key columns could be found in a file; all of its
    /// records are unmatched.
    NoKeyColumns { source: String },
}

impl fmt::Display for MatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchWarning::SingletonCapExceeded {
                left,
                right,
                singletons,
                cap,
            } => write!(
                f,
                "near-duplicate detection skipped for '{}' vs '{}': {} singletons exceed the cap of {}",
                left, right, singletons, cap
            ),
            MatchWarning::NoKeyColumns { source } => {
                write!(f, "no key column found in '{}'; its records are unmatched", source)
            }
        }
    }
}

/// Result of matching a set of datasets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Every source id, in input order.
    pub sources: IndexSet<String>,
    /// Groups in first-seen order across the concatenated inputs.
    pub groups: Vec<MatchGroup>,
    pub duplicates: Vec<ProbableDuplicate>,
    pub warnings: Vec<MatchWarning>,
    /// Cells rejected by the normalizer.
    pub normalization_errors: usize,
    /// ISSN keys whose check digit does not verify.
    pub checksum_mismatches: usize,
}

impl MatchOutcome {
    /// Status of the group at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn status(&self, index: usize) -> MatchStatus {
        let flagged = self
            .duplicates
            .iter()
            .any(|d| d.left == index || d.right == index);
        self.status_of(&self.groups[index], flagged)
    }

    /// Statuses of all groups, index-aligned with [`MatchOutcome::groups`].
    pub fn statuses(&self) -> Vec<MatchStatus> {
        let flagged: HashSet<usize> = self
            .duplicates
            .iter()
            .flat_map(|d| [d.left, d.right])
            .collect();
        self.groups
            .iter()
            .enumerate()
            .map(|(i, g)| self.status_of(g, flagged.contains(&i)))
            .collect()
    }

    fn status_of(&self, group: &MatchGroup, flagged: bool) -> MatchStatus {
        if group.is_common(&self.sources) {
            MatchStatus::Common
        } else if group.presence.len() > 1 {
            MatchStatus::Partial(group.presence.iter().cloned().collect())
        } else if flagged {
            MatchStatus::ProbableDuplicate
        } else {
            MatchStatus::Exclusive(group.presence.first().cloned().unwrap_or_default())
        }
    }

    /// Total records across all groups.
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }

    pub fn common_groups(&self) -> impl Iterator<Item = &MatchGroup> {
        self.groups.iter().filter(|g| g.is_common(&self.sources))
    }

    /// Groups found only in `source`.
    pub fn exclusive_groups<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a MatchGroup> {
        self.groups
            .iter()
            .filter(move |g| g.presence.len() == 1 && g.presence.contains(source))
    }
}
