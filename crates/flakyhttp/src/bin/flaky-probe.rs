//! flaky-probe: send requests through a fault-injecting transport.
//!
//! Useful for checking a rules file before rolling it out: point it at a
//! destination, edit the rules, and watch which requests start failing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use http_body_util::BodyExt;
use hyper::Request;
use tracing::{info, warn};

use flakyhttp::config::load_dotenv;
use flakyhttp::{FlakyTransport, RequestBody, RoundTrip};

// ── CLI ─────────────────────────────────────────────────────────────

/// Probe a destination through a fault-injecting HTTP transport.
#[derive(Parser, Debug)]
#[command(name = "flaky-probe", version, about)]
struct Cli {
    /// Path to the rules file to watch.
    #[arg(long, env = "FLAKY_RULES_PATH")]
    rules: PathBuf,

    /// Fixed `key=value` pair scoping the rules to this instance (repeatable).
    #[arg(long = "pair", value_name = "KEY=VALUE")]
    pairs: Vec<String>,

    /// URL to request (plain http only).
    #[arg(long)]
    url: String,

    /// Number of requests to send.
    #[arg(long, default_value_t = 10)]
    count: u64,

    /// Pause between requests in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Dial timeout in seconds.
    #[arg(long, env = "FLAKY_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    connect_timeout: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let transport = FlakyTransport::builder(&cli.rules)
        .fixed_pairs(&cli.pairs)
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .on_reload_error(|e| warn!(error = %e, "rules file rejected"))
        .build()?;

    // Log every reload so rule edits can be lined up with the results.
    let mut waiter = transport.reload_waiter();
    let store = transport.store().clone();
    let reloads = tokio::spawn(async move {
        while let Ok(revision) = waiter.wait().await {
            info!(revision, rules = store.snapshot().rules.len(), "rules reloaded");
        }
    });

    let mut failed = 0u64;
    for i in 0..cli.count {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
        }
        let req = Request::get(cli.url.as_str()).body(RequestBody::default())?;
        match transport.round_trip(req).await {
            Ok(resp) => {
                let status = resp.status();
                // Drain the body so the connection can be reused.
                let body = resp.into_body().collect().await?.to_bytes();
                info!(request = i + 1, %status, bytes = body.len(), "request succeeded");
            }
            Err(e) => {
                failed += 1;
                warn!(request = i + 1, error = %e, "request failed");
            }
        }
    }

    info!(
        sent = cli.count,
        failed,
        succeeded = cli.count - failed,
        "probe finished"
    );
    transport.close();
    reloads.abort();
    Ok(())
}
