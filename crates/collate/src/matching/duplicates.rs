//! Near-duplicate detection between singleton groups of different files.

use indexmap::{IndexMap, IndexSet};

use super::{MatchWarning, ProbableDuplicate};
use crate::config::SimilarityMetric;

/// A singleton group's title, borrowed from the group being inspected.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SingletonTitle<'a> {
    pub group: usize,
    pub source: &'a str,
    pub title: &'a str,
}

pub(crate) struct DuplicateDetector {
    threshold: usize,
    cap: usize,
    metric: SimilarityMetric,
}

impl DuplicateDetector {
    pub fn new(threshold: usize, cap: usize, metric: SimilarityMetric) -> Self {
        Self {
            threshold,
            cap,
            metric,
        }
    }

    /// Compare singletons pairwise across every pair of files.
    ///
    /// A file pair whose combined singleton count exceeds the cap is skipped
    /// with a warning instead of being compared.
    pub fn detect<'a>(
        &self,
        sources: &IndexSet<String>,
        singletons: impl IntoIterator<Item = SingletonTitle<'a>>,
    ) -> (Vec<ProbableDuplicate>, Vec<MatchWarning>) {
        let mut by_source: IndexMap<&str, Vec<SingletonTitle<'a>>> =
            sources.iter().map(|s| (s.as_str(), Vec::new())).collect();
        for s in singletons {
            if let Some(bucket) = by_source.get_mut(s.source) {
                bucket.push(s);
            }
        }

        let buckets: Vec<(&str, Vec<SingletonTitle<'a>>)> = by_source.into_iter().collect();
        let mut duplicates = Vec::new();
        let mut warnings = Vec::new();

        for (i, (left_source, left)) in buckets.iter().enumerate() {
            for (right_source, right) in &buckets[i + 1..] {
                if left.is_empty() || right.is_empty() {
                    continue;
                }
                let count = left.len() + right.len();
                if count > self.cap {
                    let warning = MatchWarning::SingletonCapExceeded {
                        left: left_source.to_string(),
                        right: right_source.to_string(),
                        singletons: count,
                        cap: self.cap,
                    };
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
                self.compare(left, right, &mut duplicates);
            }
        }

        duplicates.sort_by_key(|d| (d.left, d.right));
        (duplicates, warnings)
    }

    fn compare(
        &self,
        left: &[SingletonTitle<'_>],
        right: &[SingletonTitle<'_>],
        out: &mut Vec<ProbableDuplicate>,
    ) {
        for l in left {
            let l_len = l.title.chars().count();
            for r in right {
                // The distance is at least the length difference.
                if l_len.abs_diff(r.title.chars().count()) > self.threshold {
                    continue;
                }
                let distance = self.metric.distance(l.title, r.title);
                if distance <= self.threshold {
                    let (first, second) = if l.group < r.group { (l, r) } else { (r, l) };
                    out.push(ProbableDuplicate {
                        left: first.group,
                        right: second.group,
                        left_title: first.title.to_string(),
                        right_title: second.title.to_string(),
                        distance,
                    });
                }
            }
        }
    }
}
