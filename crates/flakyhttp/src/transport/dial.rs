//! The dial step: opening TCP connections, optionally failing them.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::decision::DecisionEngine;
use crate::rules::Stage;

/// Opens a connection to a `host:port` address.
#[async_trait]
pub trait Dial: fmt::Debug + Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream>;
}

/// Plain TCP dialer with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dial for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial {addr}: timed out after {:?}", self.connect_timeout),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Consults the [`DecisionEngine`] before every dial.
#[derive(Debug)]
pub struct FlakyDialer {
    inner: Arc<dyn Dial>,
    engine: Arc<DecisionEngine>,
}

impl FlakyDialer {
    pub fn new(inner: Arc<dyn Dial>, engine: Arc<DecisionEngine>) -> Self {
        Self { inner, engine }
    }
}

#[async_trait]
impl Dial for FlakyDialer {
    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        if self.engine.should_fail(Stage::Dial, addr) {
            debug!(addr, "injecting dial failure");
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "dial failed by fault injection",
            ));
        }
        self.inner.dial(addr).await
    }
}
