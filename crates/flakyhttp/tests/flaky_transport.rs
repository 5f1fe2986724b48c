//! End-to-end tests: a local HTTP server, a real rules file and the
//! platform filesystem watcher.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use hyper::Request;
use tempfile::TempDir;

use flakyhttp::{FlakyTransport, RequestBody, RoundTrip, RuleError, TransportError, WaitError};

const RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

async fn serve() -> SocketAddr {
    let app = Router::new().route("/", get(|| async { "okay" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestEnv {
    _dir: TempDir,
    rules_path: PathBuf,
    host: String,
    url: String,
    transport: FlakyTransport,
}

impl TestEnv {
    async fn new(pairs: &[&str]) -> Self {
        let addr = serve().await;
        let dir = TempDir::new().expect("create tempdir");
        let rules_path = dir.path().join("flaky.rules");
        let transport = FlakyTransport::new(&rules_path, pairs.iter().copied()).unwrap();
        Self {
            _dir: dir,
            rules_path,
            host: addr.to_string(),
            url: format!("http://{addr}/"),
            transport,
        }
    }

    /// Write the rules file and wait until the transport has loaded it.
    async fn configure(&self, rules: &[String]) {
        let mut waiter = self.transport.reload_waiter();
        fs::write(&self.rules_path, rules.join("\n")).unwrap();
        waiter
            .wait_timeout(RELOAD_TIMEOUT)
            .await
            .expect("transport did not pick up rules change");
    }

    async fn get(&self) -> Result<String, TransportError> {
        fetch(&self.transport, &self.url).await
    }

    async fn works(&self) -> bool {
        self.get().await.is_ok()
    }
}

async fn fetch(transport: &FlakyTransport, url: &str) -> Result<String, TransportError> {
    let req = Request::get(url).body(RequestBody::default()).unwrap();
    let resp = transport.round_trip(req).await?;
    // Read the whole body so the connection goes back to the pool.
    let body = resp.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn no_rules_file_injects_nothing() {
    let te = TestEnv::new(&[]).await;
    for _ in 0..5 {
        assert_eq!(te.get().await.unwrap(), "okay");
    }
}

#[tokio::test]
async fn fail_all() {
    let te = TestEnv::new(&[]).await;
    assert!(te.works().await, "requests not working before configuring any rules");

    te.configure(&[format!("dest={} rate=100%", te.host)]).await;
    assert!(!te.works().await, "request unexpectedly did not fail");
}

#[tokio::test]
async fn rules_for_other_destinations_do_not_apply() {
    let te = TestEnv::new(&[]).await;
    te.configure(&["dest=127.0.0.1:1 rate=100%".to_string()]).await;
    assert!(te.works().await);
}

#[tokio::test]
async fn fail_all_connections() {
    let te = TestEnv::new(&[]).await;
    te.configure(&[format!("dest={} rate=100% stage=dial", te.host)]).await;
    assert!(!te.works().await, "request unexpectedly did not fail");
}

#[tokio::test]
async fn dial_rule_spares_established_connections() {
    let te = TestEnv::new(&[]).await;
    assert!(te.works().await);
    assert_eq!(te.transport.underlying().idle_connections(&te.host), 1);

    te.configure(&[format!("dest={} rate=100% stage=dial", te.host)]).await;
    assert!(te.works().await, "pooled connection should not be dialed again");

    te.transport.underlying().close_idle_connections();
    assert!(!te.works().await, "fresh dial unexpectedly succeeded");
}

#[tokio::test]
async fn fail_new_connections() {
    let te = TestEnv::new(&[]).await;
    assert!(te.works().await);

    te.configure(&[
        format!("dest={} rate=100% stage=dial", te.host),
        format!("dest={} stage=request redial=force", te.host),
    ])
    .await;
    assert!(!te.works().await, "request unexpectedly did not fail");
    assert_eq!(te.transport.underlying().idle_connections(&te.host), 0);
}

#[tokio::test]
async fn application_specific() {
    let te = TestEnv::new(&["robustirc=node2"]).await;
    assert!(te.works().await);

    te.configure(&["robustirc=node1 rate=100% stage=request".to_string()]).await;
    assert!(te.works().await, "request unexpectedly failed");

    te.configure(&["robustirc=node2 rate=100% stage=request".to_string()]).await;
    assert!(!te.works().await, "request unexpectedly did not fail");
}

#[tokio::test]
async fn fail_rate() {
    let te = TestEnv::new(&[]).await;
    te.configure(&[format!("dest={} rate=50% stage=request", te.host)]).await;

    let mut failing = 0;
    for _ in 0..100 {
        if !te.works().await {
            failing += 1;
        }
    }
    // Binomial(100, 0.5): four standard deviations either side.
    assert!((30..=70).contains(&failing), "failing = {failing}");
}

#[tokio::test]
async fn injected_failures_are_io_errors() {
    let te = TestEnv::new(&[]).await;

    te.configure(&[format!("dest={} stage=request", te.host)]).await;
    match te.get().await {
        Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected injected request failure, got {other:?}"),
    }

    te.configure(&[format!("dest={} stage=dial", te.host)]).await;
    match te.get().await {
        Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
        other => panic!("expected injected dial failure, got {other:?}"),
    }
}

#[tokio::test]
async fn reload_propagates_to_next_call() {
    let te = TestEnv::new(&[]).await;
    let before = te.transport.store().revision();

    let mut waiter = te.transport.reload_waiter();
    fs::write(&te.rules_path, format!("dest={} stage=request", te.host)).unwrap();
    let revision = waiter.wait_timeout(RELOAD_TIMEOUT).await.unwrap();
    assert!(revision > before);
    assert!(!te.works().await);

    te.configure(&[]).await;
    assert!(te.works().await);
}

#[tokio::test]
async fn rename_over_rules_file_reloads() {
    let te = TestEnv::new(&[]).await;
    let tmp = te.rules_path.with_file_name(".flaky.rules.tmp");

    let mut waiter = te.transport.reload_waiter();
    fs::write(&tmp, format!("dest={} rate=100%", te.host)).unwrap();
    fs::rename(&tmp, &te.rules_path).unwrap();
    waiter.wait_timeout(RELOAD_TIMEOUT).await.unwrap();

    assert!(!te.works().await);
}

#[tokio::test]
async fn removing_rules_file_clears_rules() {
    let te = TestEnv::new(&[]).await;
    te.configure(&[format!("dest={} rate=100%", te.host)]).await;
    assert!(!te.works().await);

    let mut waiter = te.transport.reload_waiter();
    fs::remove_file(&te.rules_path).unwrap();
    waiter.wait_timeout(RELOAD_TIMEOUT).await.unwrap();

    assert!(te.transport.store().snapshot().rules.is_empty());
    assert!(te.works().await);
}

#[tokio::test]
async fn malformed_rules_keep_previous_version() {
    let addr = serve().await;
    let host = addr.to_string();
    let url = format!("http://{addr}/");
    let dir = TempDir::new().unwrap();
    let rules_path = dir.path().join("flaky.rules");

    let (err_tx, mut err_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = FlakyTransport::builder(&rules_path)
        .on_reload_error(move |e: &RuleError| {
            let _ = err_tx.send(e.to_string());
        })
        .build()
        .unwrap();
    let mut waiter = transport.reload_waiter();
    fs::write(&rules_path, format!("dest={host} stage=request")).unwrap();
    waiter.wait_timeout(RELOAD_TIMEOUT).await.unwrap();
    let revision = transport.store().revision();
    assert!(fetch(&transport, &url).await.is_err());

    fs::write(&rules_path, format!("dest={host} rate=often")).unwrap();
    let reported = tokio::time::timeout(RELOAD_TIMEOUT, err_rx.recv())
        .await
        .expect("reload error not reported")
        .unwrap();
    assert!(reported.contains("invalid rate"), "{reported}");
    assert_eq!(transport.store().revision(), revision);
    assert!(
        fetch(&transport, &url).await.is_err(),
        "previous rules should still apply"
    );

    let mut waiter = transport.reload_waiter();
    fs::write(&rules_path, "dest=127.0.0.1:1").unwrap();
    waiter.wait_timeout(RELOAD_TIMEOUT).await.unwrap();
    assert!(fetch(&transport, &url).await.is_ok());
}

#[tokio::test]
async fn manual_reload_surfaces_errors() {
    let te = TestEnv::new(&[]).await;
    te.transport.close();
    fs::write(&te.rules_path, "dest=a stage=sometimes").unwrap();

    let revision = te.transport.store().revision();
    let err = te.transport.reload().unwrap_err();
    assert!(matches!(err, RuleError::Parse { line: 1, .. }));
    assert_eq!(te.transport.store().revision(), revision);

    fs::write(&te.rules_path, format!("dest={}", te.host)).unwrap();
    assert_eq!(te.transport.reload().unwrap(), revision + 1);
    assert!(!te.works().await);
}

#[tokio::test]
async fn close_stops_watching() {
    let te = TestEnv::new(&[]).await;
    te.transport.close();

    let mut waiter = te.transport.reload_waiter();
    fs::write(&te.rules_path, format!("dest={} rate=100%", te.host)).unwrap();
    assert_eq!(
        waiter.wait_timeout(Duration::from_millis(300)).await,
        Err(WaitError::Timeout(Duration::from_millis(300)))
    );
    assert!(te.works().await);
}

#[test]
fn malformed_fixed_pair_fails_construction() {
    let dir = TempDir::new().unwrap();
    let err = FlakyTransport::new(dir.path().join("flaky.rules"), ["node2"]).unwrap_err();
    assert!(matches!(err, RuleError::MalformedPair(p) if p == "node2"));
}

#[test]
fn malformed_initial_rules_fail_construction() {
    let dir = TempDir::new().unwrap();
    let rules_path = dir.path().join("flaky.rules");
    fs::write(&rules_path, "dest=a dest=b").unwrap();
    let err = FlakyTransport::new(&rules_path, Vec::<String>::new()).unwrap_err();
    assert!(matches!(err, RuleError::Parse { line: 1, .. }));
}

#[test]
fn missing_rules_directory_fails_construction() {
    let dir = TempDir::new().unwrap();
    let rules_path = dir.path().join("absent").join("flaky.rules");
    let err = FlakyTransport::new(rules_path, Vec::<String>::new()).unwrap_err();
    assert!(matches!(err, RuleError::Io(_)));
}
