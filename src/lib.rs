//! Stageload: a staged synthetic-load generator.
//!
//! A load run is a list of named **stages** executed strictly one after the
//! other. Each stage has its own pacing, worker concurrency and duration, and
//! feeds freshly generated request **sequences** (ordered batches of requests,
//! such as a user journey) to its workers. Every executed request yields a
//! [`LoadResult`] carrying its status and a timing breakdown (DNS, connect,
//! TCP, TLS, server, response, total), streamed to per-stage and global
//! result streams.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`SequenceGenerator`]: caller-supplied function producing one
//!   [`RequestSequence`] per call.
//! - [`Stage`]: one phase of the run. Owns its pacing, its bounded sequence
//!   queue and its completion signal ([`Stage::ready`]).
//! - [`LoadTest`]: the driver. Runs stages in order, pumps generated sequences
//!   into each stage's [`WorkerPool`], enforces stage durations and fans results
//!   out.
//! - [`Transport`]: the narrow boundary to the wire, "execute this request and
//!   tell me how long each phase took". [`HttpTransport`] is the built-in
//!   HTTP/1.1 implementation.
//! - [`Summary`], [`SummaryReport`] and [`Reporter`]: optional tallying of a
//!   result stream once the run is over.
//!
//! # Delivery semantics
//!
//! Result publication never blocks an executor. A result offered to a stream
//! that has no receiver waiting (and no buffer room) is dropped, silently. Use
//! buffered channels when completeness matters more than back-pressure
//! freedom. Request failures are data, not errors: they show up as results
//! with `is_err` set and every other field empty.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use stageload::{
//!     LoadTest, RequestDescriptor, Reporter, Stage, StageConfig, Summary, SummaryReport,
//!     TracingReporter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let journey = || {
//!         vec![
//!             RequestDescriptor::get("http://localhost:3000/").unwrap(),
//!             RequestDescriptor::post("http://localhost:3000/login")
//!                 .unwrap()
//!                 .form("user", "alice"),
//!         ]
//!     };
//!
//!     let warmup = Stage::new(
//!         StageConfig::builder()
//!             .name("warmup")
//!             .generator(Arc::new(journey))
//!             .workers(2)
//!             .sequence_interval(Duration::from_millis(100))
//!             .load_time(Duration::from_secs(5))
//!             .build(),
//!     )?;
//!     let peak = Stage::new(
//!         StageConfig::builder()
//!             .name("peak")
//!             .generator(Arc::new(journey))
//!             .workers(32)
//!             .capacity(64)
//!             .load_time(Duration::from_secs(30))
//!             .build(),
//!     )?;
//!
//!     let run = LoadTest::new(Duration::from_secs(2), vec![warmup, peak]).load();
//!     let summary = Summary::collect(run.results).await;
//!     TracingReporter.report(&SummaryReport::from(summary)).await?;
//!     Ok(())
//! }
//! ```

/// Result tallies
pub mod aggregate;
/// Configuration and runtime errors
pub mod error;
/// Stages and the driver that runs them
pub mod executor;
/// Bounded worker concurrency
pub mod pool;
/// Request descriptors and sequences
pub mod request;
/// Reports and Reporters
pub mod report;
/// Per-request result records
pub mod result;
/// One-shot completion signals
pub mod signal;
/// Request timing traces
pub mod trace;
/// The boundary to the wire
pub mod transport;

pub use aggregate::Summary;
pub use error::{Error, Result, TransportError};
pub use executor::{LoadRun, LoadTest, Stage, StageConfig};
pub use pool::WorkerPool;
pub use report::{JsonReporter, Reporter, SummaryReport, TracingReporter};
pub use request::{RequestDescriptor, RequestSequence, SequenceGenerator};
pub use result::LoadResult;
pub use signal::Completion;
pub use trace::Trace;
pub use transport::{HttpTransport, TracedResponse, Transport};
