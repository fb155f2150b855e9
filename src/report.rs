use std::{collections::BTreeMap, future::Future, io::Write};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Summary;

/// The derived view of a [`Summary`]: the same counts plus ratios.
///
/// Reports are pure data. Getting them somewhere is a [`Reporter`]'s job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub count: usize,
    pub errors: usize,
    /// Percentage of results flagged as errors, 0 when there are none.
    pub error_ratio: f64,
    pub status_codes: BTreeMap<String, usize>,
    pub stages: BTreeMap<String, usize>,
}

impl From<Summary> for SummaryReport {
    fn from(value: Summary) -> Self {
        let error_ratio = if value.count == 0 {
            0.0
        } else {
            value.errors as f64 / value.count as f64 * 100.0
        };
        Self {
            count: value.count,
            errors: value.errors,
            error_ratio,
            status_codes: value.status_codes,
            stages: value.stages,
        }
    }
}

/// Sends a [`SummaryReport`] somewhere: logs, a terminal, a file.
///
/// ```rust
/// use stageload::{Reporter, SummaryReport};
///
/// struct Silent;
/// impl Reporter for Silent {
///     async fn report(&self, _: &SummaryReport) -> Result<(), Box<dyn std::error::Error>> {
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(
        &self,
        report: &SummaryReport,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

/// Emits the report as a single `info` event.
pub struct TracingReporter;

impl Reporter for TracingReporter {
    async fn report(&self, report: &SummaryReport) -> Result<(), Box<dyn std::error::Error>> {
        tracing::info!(
            count = report.count,
            errors = report.errors,
            error_ratio = report.error_ratio,
            status_codes = ?report.status_codes,
            stages = ?report.stages,
            "Load test summary"
        );
        Ok(())
    }
}

/// Writes the report as one line of JSON.
pub struct JsonReporter<W> {
    out: Mutex<W>,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    async fn report(&self, report: &SummaryReport) -> Result<(), Box<dyn std::error::Error>> {
        let mut out = self.out.lock();
        serde_json::to_writer(&mut *out, report)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
