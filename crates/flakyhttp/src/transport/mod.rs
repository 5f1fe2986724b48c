//! HTTP/1 transport with fault injection at the dial and request stages.
//!
//! [`HttpTransport`] is a small pooled HTTP/1 client over a pluggable
//! [`Dial`] step. [`FlakyTransport`] wraps it: dials go through a
//! [`FlakyDialer`] and every round trip is checked against the rules first.

mod dial;
mod flaky;
mod http;
mod pool;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};

pub use self::dial::{Dial, FlakyDialer, TcpDialer};
pub use self::flaky::{FlakyTransport, FlakyTransportBuilder};
pub use self::http::{HttpConfig, HttpTransport};

/// Request body type accepted by the transports.
pub type RequestBody = Full<Bytes>;

/// Errors returned by a round trip.
///
/// Injected failures are reported as [`TransportError::Io`], the same
/// variant a refused or reset connection produces.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request URI: {0}")]
    InvalidUri(String),

    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
}

/// Sends one request and returns the streamed response.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(
        &self,
        req: Request<RequestBody>,
    ) -> Result<Response<Incoming>, TransportError>;
}
