//! Transport: the boundary between the orchestration engine and the wire
//!
//! The engine only needs one capability from a transport: execute a
//! [`RequestDescriptor`] and report the status plus a timing [`Trace`]. The
//! [`Transport`] trait captures exactly that, so the HTTP client can vary
//! independently of stages and executors (a recording mock in tests, the
//! built-in [`HttpTransport`] in real runs).
//!
//! A single transport instance is shared by every sequence executor of every
//! stage for the whole run, so implementations must be safe for concurrent use.
//!
//! [`execute_request`] is the adapter the executors call: it turns the
//! transport's outcome into a [`LoadResult`], collapsing any failure into the
//! error flag.
pub mod http;
pub use self::http::HttpTransport;

use std::future::Future;

use ::http::StatusCode;

use crate::{LoadResult, RequestDescriptor, error::TransportError, trace::Trace};

/// Outcome of a successfully executed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedResponse {
    pub status: StatusCode,
    pub trace: Trace,
}

/// A client able to execute a request with timing-trace capture.
pub trait Transport
where
    Self: Send + Sync + 'static,
{
    /// Execute one request. A non-2xx status is still a success here, only
    /// failing to obtain a response is an error.
    fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> impl Future<Output = Result<TracedResponse, TransportError>> + Send;
}

/// Executes `request` and maps the outcome into a [`LoadResult`].
///
/// Transport errors are reduced to `is_err = true`; the error text only goes
/// to the debug log.
pub async fn execute_request<T: Transport>(transport: &T, request: &RequestDescriptor) -> LoadResult {
    match transport.execute(request).await {
        Ok(response) => LoadResult::from_trace(response.status, &response.trace),
        Err(e) => {
            tracing::debug!("{} {} failed: {e}", request.method, request.url);
            LoadResult::failed()
        }
    }
}
