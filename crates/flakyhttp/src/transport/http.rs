//! The underlying HTTP/1 transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tracing::{debug, trace};

use super::dial::{Dial, TcpDialer};
use super::pool::Pool;
use super::{RequestBody, RoundTrip, TransportError};

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_idle_per_host: 2,
        }
    }
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    /// `host[:port]` as written in the URI; the request-stage destination
    /// and the pool key.
    pub(crate) dest: String,
    /// `host:port` with the default port filled in; the dial destination.
    pub(crate) dial_addr: String,
}

impl Target {
    pub(crate) fn from_uri(uri: &Uri) -> Result<Self, TransportError> {
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(TransportError::UnsupportedScheme(other.to_string())),
            None => return Err(TransportError::InvalidUri(uri.to_string())),
        }
        let authority = uri
            .authority()
            .ok_or_else(|| TransportError::InvalidUri(uri.to_string()))?;
        let host = authority.host();
        let dest = match authority.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let dial_addr = format!("{host}:{}", authority.port_u16().unwrap_or(80));
        Ok(Self { dest, dial_addr })
    }
}

/// Pooled plain-HTTP/1.1 client over a [`Dial`] implementation.
///
/// Cloning shares the pool and the dialer.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    dialer: Arc<dyn Dial>,
    pool: Arc<Pool>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        Self::with_dialer(
            Arc::new(TcpDialer::new(config.connect_timeout)),
            config.max_idle_per_host,
        )
    }

    pub fn with_dialer(dialer: Arc<dyn Dial>, max_idle_per_host: usize) -> Self {
        Self {
            dialer,
            pool: Arc::new(Pool::new(max_idle_per_host)),
        }
    }

    /// Close every pooled connection.
    pub fn close_idle_connections(&self) -> usize {
        self.pool.close_all()
    }

    /// Close the pooled connections to one destination (`host[:port]`), so
    /// the next request to it dials again.
    pub fn close_idle_connections_to(&self, dest: &str) -> usize {
        self.pool.close_dest(dest)
    }

    /// Number of pooled connections to `dest`.
    pub fn idle_connections(&self, dest: &str) -> usize {
        self.pool.len(dest)
    }

    async fn connect(&self, target: &Target) -> Result<SendRequest<RequestBody>, TransportError> {
        let stream = self.dialer.dial(&target.dial_addr).await?;
        let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        let addr = target.dial_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(addr = %addr, error = %e, "connection closed with error");
            }
        });
        debug!(addr = %target.dial_addr, "dialed new connection");
        Ok(sender)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}

#[async_trait]
impl RoundTrip for HttpTransport {
    async fn round_trip(
        &self,
        mut req: Request<RequestBody>,
    ) -> Result<Response<Incoming>, TransportError> {
        let target = Target::from_uri(req.uri())?;
        to_origin_form(&mut req, &target)?;

        let mut sender = match self.pool.checkout(&target.dest) {
            Some(sender) => {
                trace!(dest = %target.dest, "reusing pooled connection");
                sender
            }
            None => self.connect(&target).await?,
        };
        let response = sender.send_request(req).await?;
        self.pool.checkin(&target.dest, sender);
        Ok(response)
    }
}

/// Rewrite an absolute URI to `path?query` and set `Host` if missing.
fn to_origin_form(req: &mut Request<RequestBody>, target: &Target) -> Result<(), TransportError> {
    let path = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .parse::<Uri>()
        .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
    *req.uri_mut() = path;

    if !req.headers().contains_key(HOST) {
        let host = HeaderValue::from_str(&target.dest)
            .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
        req.headers_mut().insert(HOST, host);
    }
    Ok(())
}
