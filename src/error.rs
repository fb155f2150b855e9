use thiserror::Error;

/// Errors surfaced to the caller while assembling a load test.
///
/// Nothing in here is produced while a run is in flight: request failures are
/// recorded as data on [`crate::LoadResult`] and never bubble up.
#[derive(Error, Debug)]
pub enum Error {
    /// The stage or pool configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Work was submitted to a worker pool that is already draining.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// A request descriptor was built from something that is not a URL.
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single request at the transport boundary.
///
/// The adapter in [`crate::transport`] collapses every variant into an error
/// flag, the detail only reaches the debug log.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request cannot be sent: {0}")]
    InvalidRequest(String),

    #[error("dns lookup failed for {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}
