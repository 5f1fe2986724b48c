//! Idle HTTP/1 connections, keyed by destination.

use std::collections::HashMap;
use std::sync::Mutex;

use hyper::client::conn::http1::SendRequest;

use super::RequestBody;

/// Connections kept open for reuse.
///
/// A connection is checked back in as soon as its response headers arrive;
/// it only becomes available for checkout once its previous response body
/// has been consumed.
#[derive(Debug)]
pub(crate) struct Pool {
    idle: Mutex<HashMap<String, Vec<SendRequest<RequestBody>>>>,
    max_idle_per_host: usize,
}

impl Pool {
    pub(crate) fn new(max_idle_per_host: usize) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_host,
        }
    }

    /// Take a connection that is ready for a new request, dropping any that
    /// the peer has closed.
    pub(crate) fn checkout(&self, dest: &str) -> Option<SendRequest<RequestBody>> {
        let mut idle = self.idle.lock().expect("connection pool lock poisoned");
        let conns = idle.get_mut(dest)?;
        conns.retain(|conn| !conn.is_closed());
        let ready = conns.iter().position(|conn| conn.is_ready());
        let ready = ready.map(|i| conns.swap_remove(i));
        if conns.is_empty() {
            idle.remove(dest);
        }
        ready
    }

    /// Return a connection after use. Dropped if closed or over the limit.
    pub(crate) fn checkin(&self, dest: &str, conn: SendRequest<RequestBody>) {
        if conn.is_closed() || self.max_idle_per_host == 0 {
            return;
        }
        let mut idle = self.idle.lock().expect("connection pool lock poisoned");
        let conns = idle.entry(dest.to_string()).or_default();
        conns.retain(|conn| !conn.is_closed());
        if conns.len() < self.max_idle_per_host {
            conns.push(conn);
        }
    }

    /// Drop every pooled connection to `dest`. Returns how many were closed.
    pub(crate) fn close_dest(&self, dest: &str) -> usize {
        self.idle
            .lock()
            .expect("connection pool lock poisoned")
            .remove(dest)
            .map_or(0, |conns| conns.len())
    }

    pub(crate) fn close_all(&self) -> usize {
        let mut idle = self.idle.lock().expect("connection pool lock poisoned");
        let closed = idle.values().map(Vec::len).sum();
        idle.clear();
        closed
    }

    /// Pooled connections to `dest` that the peer has not closed.
    pub(crate) fn len(&self, dest: &str) -> usize {
        self.idle
            .lock()
            .expect("connection pool lock poisoned")
            .get(dest)
            .map_or(0, |conns| conns.iter().filter(|c| !c.is_closed()).count())
    }
}
