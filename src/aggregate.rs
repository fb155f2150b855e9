use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::LoadResult;

/// Compact, mergeable tally of [`LoadResult`]s.
///
/// A `Summary` only counts. Ratios and other derived figures belong in
/// [`crate::report::SummaryReport`], which is built from a finished summary.
///
/// Summaries are cheap to merge, so one summary per consumer (per stage
/// stream, say) can be combined afterwards. `merge` is associative and
/// commutative.
///
/// ```rust
/// use stageload::{LoadResult, Summary};
///
/// let mut a = Summary::new();
/// a.consume(&LoadResult::failed());
///
/// let mut b = Summary::new();
/// b.consume(&LoadResult { status_code: "200".into(), ..Default::default() });
///
/// a.merge(b);
/// assert_eq!(a.count, 2);
/// assert_eq!(a.errors, 1);
/// assert_eq!(a.status_codes["200"], 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub errors: usize,
    /// Successful results per status code.
    pub status_codes: BTreeMap<String, usize>,
    /// Results per stage name.
    pub stages: BTreeMap<String, usize>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incorporate a single result.
    pub fn consume(&mut self, result: &LoadResult) {
        self.count += 1;
        if result.is_err {
            self.errors += 1;
        } else {
            *self.status_codes.entry(result.status_code.clone()).or_default() += 1;
        }
        *self.stages.entry(result.stage_name.clone()).or_default() += 1;
    }

    pub fn aggregate(&mut self, results: &[LoadResult]) {
        results.iter().for_each(|r| self.consume(r));
    }

    /// Combine two summaries into one.
    pub fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.errors += other.errors;
        for (code, n) in other.status_codes {
            *self.status_codes.entry(code).or_default() += n;
        }
        for (stage, n) in other.stages {
            *self.stages.entry(stage).or_default() += n;
        }
    }

    /// Consumes a result stream until it closes.
    pub async fn collect(results: flume::Receiver<LoadResult>) -> Self {
        let mut summary = Self::new();
        while let Ok(result) = results.recv_async().await {
            summary.consume(&result);
        }
        summary
    }
}
