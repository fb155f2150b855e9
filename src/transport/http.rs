use std::{collections::HashMap, io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Request,
    header::{CONNECTION, CONTENT_TYPE, COOKIE, HOST},
};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, lookup_host},
    time::Instant,
};
use tokio_rustls::TlsConnector;
use typed_builder::TypedBuilder;
use url::{Host, Position, Url, form_urlencoded};

use super::{TracedResponse, Transport};
use crate::{RequestDescriptor, error::TransportError, trace::Trace};

type Sender = SendRequest<Full<Bytes>>;

/// HTTP/1.1 client that records a [`Trace`] for every request.
///
/// Connections are opened by hand (DNS lookup, TCP connect, optional TLS
/// handshake, HTTP handshake) so each phase can be timed. Keep-alive
/// connections are parked per `scheme://host:port` and reused by later
/// requests, which then report `is_conn_reused = true` with zero DNS, TCP and
/// TLS timings.
///
/// ```rust
/// use std::time::Duration;
/// use stageload::HttpTransport;
///
/// let transport = HttpTransport::builder()
///     .timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(TypedBuilder)]
pub struct HttpTransport {
    /// Upper bound for one whole request, connection setup included.
    #[builder(default = Duration::from_secs(30))]
    timeout: Duration,
    /// How many idle connections are kept per host.
    #[builder(default = 32)]
    pool_idle_per_host: usize,
    #[builder(default = default_tls(), setter(skip))]
    tls: TlsConnector,
    #[builder(default, setter(skip))]
    idle: Mutex<HashMap<String, Vec<Sender>>>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<TracedResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

impl HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TracedResponse, TransportError> {
        let start = Instant::now();
        let (target, req) = translate(request)?;

        let mut trace = Trace::default();
        let mut sender = match self.checkout(&target.key).await {
            Some(sender) => {
                trace.is_conn_reused = true;
                sender
            }
            None => self.connect(&target, &mut trace).await?,
        };
        trace.conn_time = start.elapsed();

        let sent = Instant::now();
        let response = sender.send_request(req).await?;
        trace.server_time = sent.elapsed();

        let head = Instant::now();
        let (parts, body) = response.into_parts();
        body.collect().await?;
        trace.response_time = head.elapsed();
        trace.total_time = start.elapsed();

        self.checkin(target.key, sender, &parts.headers);
        Ok(TracedResponse {
            status: parts.status,
            trace,
        })
    }

    async fn checkout(&self, key: &str) -> Option<Sender> {
        loop {
            let mut sender = self.idle.lock().get_mut(key)?.pop()?;
            if sender.is_closed() {
                continue;
            }
            if sender.ready().await.is_ok() {
                return Some(sender);
            }
        }
    }

    fn checkin(&self, key: String, sender: Sender, headers: &HeaderMap) {
        let close = headers
            .get(CONNECTION)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"));
        if close || sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        let parked = idle.entry(key).or_default();
        if parked.len() < self.pool_idle_per_host {
            parked.push(sender);
        }
    }

    async fn connect(&self, target: &Target, trace: &mut Trace) -> Result<Sender, TransportError> {
        let dns = Instant::now();
        let addrs: Vec<SocketAddr> = lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|source| TransportError::Dns {
                host: target.host.clone(),
                source,
            })?
            .collect();
        trace.dns_lookup = dns.elapsed();

        let tcp_start = Instant::now();
        let tcp = connect_any(&addrs).await.map_err(|source| TransportError::Connect {
            addr: format!("{}:{}", target.host, target.port),
            source,
        })?;
        trace.tcp_conn_time = tcp_start.elapsed();
        let _ = tcp.set_nodelay(true);

        if !target.tls {
            return handshake(tcp).await;
        }

        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|e| TransportError::InvalidRequest(format!("invalid server name: {e}")))?;
        let tls_start = Instant::now();
        let stream = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|source| TransportError::Tls {
                host: target.host.clone(),
                source,
            })?;
        trace.tls_handshake = tls_start.elapsed();
        handshake(stream).await
    }
}

async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

async fn handshake<S>(stream: S) -> Result<Sender, TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("Connection ended: {e}");
        }
    });
    Ok(sender)
}

fn default_tls() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    TlsConnector::from(Arc::new(config))
}

/// Where a request goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Value for the `Host` header.
    pub authority: String,
    /// Connection pool key.
    pub key: String,
}

impl Target {
    fn from_url(url: &Url) -> Result<Self, TransportError> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(TransportError::InvalidRequest(format!(
                    "unsupported scheme {other:?}"
                )));
            }
        };
        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(TransportError::InvalidRequest("url has no host".into())),
        };
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
        let authority = url[Position::BeforeHost..Position::AfterPort].to_string();
        let key = format!("{}://{}:{}", url.scheme(), host, port);
        Ok(Self {
            host,
            port,
            tls,
            authority,
            key,
        })
    }
}

/// Builds the wire request for a descriptor: query folded into the URL, form
/// fields encoded as the body when there is no explicit body, cookies folded
/// into one `Cookie` header.
pub(crate) fn translate(
    request: &RequestDescriptor,
) -> Result<(Target, Request<Full<Bytes>>), TransportError> {
    let url = request.full_url();
    let target = Target::from_url(&url)?;
    let mut headers = request.headers.clone();

    if !headers.contains_key(HOST) {
        headers.insert(HOST, header_value(&target.authority)?);
    }

    let body = if request.body.is_empty() && !request.form.is_empty() {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
        }
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(request.form.iter())
            .finish();
        Bytes::from(encoded)
    } else {
        request.body.clone()
    };

    if !request.cookies.is_empty() {
        let jar = request
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        let value = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}; {jar}"),
            None => jar,
        };
        headers.insert(COOKIE, header_value(&value)?);
    }

    let mut req = Request::builder()
        .method(request.method.clone())
        .uri(&url[Position::BeforePath..Position::AfterQuery])
        .body(Full::new(body))
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
    *req.headers_mut() = headers;
    Ok((target, req))
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid header value {value:?}: {e}")))
}
