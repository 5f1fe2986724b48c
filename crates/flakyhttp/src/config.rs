//! Environment-driven transport configuration.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::transport::{FlakyTransport, HttpConfig, HttpTransport, RoundTrip};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Rules file; `None` disables fault injection.
    pub rules_path: Option<PathBuf>,
    /// This node's peer address, added as the `peeraddr` fixed pair.
    pub peer_addr: Option<String>,
    /// Further `key=value` fixed pairs.
    pub fixed_pairs: Vec<String>,
    pub connect_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let http = HttpConfig::default();
        Self {
            rules_path: None,
            peer_addr: None,
            fixed_pairs: Vec::new(),
            connect_timeout: http.connect_timeout,
            max_idle_per_host: http.max_idle_per_host,
        }
    }
}

impl TransportConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Empty values count as
    /// unset; unparsable numbers fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            rules_path: get("FLAKY_RULES_PATH").map(PathBuf::from),
            peer_addr: get("FLAKY_PEER_ADDR"),
            fixed_pairs: get("FLAKY_FIXED_PAIRS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            connect_timeout: get("FLAKY_CONNECT_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            max_idle_per_host: get("FLAKY_MAX_IDLE_PER_HOST")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_idle_per_host),
        }
    }

    /// All fixed pairs, `peeraddr` first.
    pub fn all_fixed_pairs(&self) -> Vec<String> {
        self.peer_addr
            .iter()
            .map(|addr| format!("peeraddr={addr}"))
            .chain(self.fixed_pairs.iter().cloned())
            .collect()
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: self.connect_timeout,
            max_idle_per_host: self.max_idle_per_host,
        }
    }
}

/// A [`FlakyTransport`] when a rules path is configured, otherwise a plain
/// [`HttpTransport`].
pub fn build_transport(config: &TransportConfig) -> Result<Arc<dyn RoundTrip>> {
    match &config.rules_path {
        Some(path) => {
            let transport = FlakyTransport::builder(path.clone())
                .fixed_pairs(config.all_fixed_pairs())
                .http_config(config.http_config())
                .build()?;
            Ok(Arc::new(transport))
        }
        None => {
            info!("no rules path configured, fault injection disabled");
            Ok(Arc::new(HttpTransport::new(config.http_config())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::error::RuleError;

    fn config(vars: &[(&str, &str)]) -> TransportConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TransportConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]);
        assert_eq!(cfg, TransportConfig::default());
        assert_eq!(cfg.connect_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_idle_per_host, 2);
        assert!(cfg.all_fixed_pairs().is_empty());
    }

    #[test]
    fn reads_all_variables() {
        let cfg = config(&[
            ("FLAKY_RULES_PATH", "/etc/flaky/flaky.rules"),
            ("FLAKY_PEER_ADDR", "10.0.0.2:13001"),
            ("FLAKY_FIXED_PAIRS", "dc=west, rack=3 ,,"),
            ("FLAKY_CONNECT_TIMEOUT_SECS", "10"),
            ("FLAKY_MAX_IDLE_PER_HOST", "0"),
        ]);
        assert_eq!(cfg.rules_path, Some(PathBuf::from("/etc/flaky/flaky.rules")));
        assert_eq!(
            cfg.all_fixed_pairs(),
            vec!["peeraddr=10.0.0.2:13001", "dc=west", "rack=3"]
        );
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_idle_per_host, 0);
    }

    #[test]
    fn empty_and_invalid_values_fall_back() {
        let cfg = config(&[
            ("FLAKY_RULES_PATH", "  "),
            ("FLAKY_CONNECT_TIMEOUT_SECS", "soon"),
            ("FLAKY_MAX_IDLE_PER_HOST", "-1"),
        ]);
        assert_eq!(cfg, TransportConfig::default());
    }

    #[test]
    fn build_transport_without_rules_path() {
        assert!(build_transport(&TransportConfig::default()).is_ok());
    }

    #[test]
    fn build_transport_with_rules_path() {
        let dir = TempDir::new().unwrap();
        let cfg = TransportConfig {
            rules_path: Some(dir.path().join("flaky.rules")),
            peer_addr: Some("10.0.0.2:13001".into()),
            ..TransportConfig::default()
        };
        assert!(build_transport(&cfg).is_ok());
    }

    #[test]
    fn build_transport_rejects_malformed_fixed_pair() {
        let dir = TempDir::new().unwrap();
        let cfg = TransportConfig {
            rules_path: Some(dir.path().join("flaky.rules")),
            fixed_pairs: vec!["rack".into()],
            ..TransportConfig::default()
        };
        assert!(matches!(
            build_transport(&cfg),
            Err(RuleError::MalformedPair(p)) if p == "rack"
        ));
    }
}
