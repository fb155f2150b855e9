use std::{fmt, sync::Arc};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::error::{Error, Result};

/// Transport-agnostic description of one HTTP request.
///
/// Descriptors are plain data: the [`crate::transport::Transport`] decides how
/// query parameters, form fields and cookies end up on the wire.
///
/// ```rust
/// use stageload::RequestDescriptor;
///
/// let req = RequestDescriptor::post("http://localhost:8080/login")
///     .unwrap()
///     .form("user", "alice")
///     .cookie("session", "abc");
/// assert_eq!(req.form.len(), 1);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub form: Vec<(String, String)>,
    pub body: Bytes,
    pub cookies: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|source| Error::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self::from_url(method, url))
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            headers: HeaderMap::new(),
            form: Vec::new(),
            body: Bytes::new(),
            cookies: Vec::new(),
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are ignored
    /// with a warning rather than failing the whole sequence.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header {name:?}"),
        }
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// The target URL with the descriptor's query parameters folded in.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        url
    }
}

// Bodies can be large, keep debug output to the request line.
impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.full_url().as_str())
            .field("headers", &self.headers.len())
            .field("form", &self.form.len())
            .field("body", &self.body.len())
            .field("cookies", &self.cookies.len())
            .finish()
    }
}

/// One unit of correlated work, executed back-to-back in order.
pub type RequestSequence = Vec<RequestDescriptor>;

/// Produces a fresh [`RequestSequence`] every time it is called.
pub type SequenceGenerator = Arc<dyn Fn() -> RequestSequence + Send + Sync>;
