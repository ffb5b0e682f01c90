//! End-to-end exercise of the distributor-facing api over real HTTP.

use culvert_api::Resource;
use culvert_backend::{http, metrics, Config};
use culvert_core::BackendResources;
use culvert_resources::Transport;
use std::io::BufRead;
use std::sync::{Arc, OnceLock};

const FP: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

/// The metrics recorder is process-global; install it once for every
/// test in this binary.
fn prometheus() -> metrics_exporter_prometheus::PrometheusHandle {
    static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
        OnceLock::new();
    HANDLE
        .get_or_init(|| metrics::init_metrics().unwrap())
        .clone()
}

fn transport(port: u16) -> Transport {
    let mut t = Transport::new();
    t.rtype = "obfs4".into();
    t.address = Some("203.0.113.5".parse().unwrap());
    t.port = port;
    t.fingerprint = FP.into();
    t.params.insert("cert".into(), "deadbeef".into());
    t
}

struct Api {
    addr: std::net::SocketAddr,
    resources: Arc<BackendResources>,
    shutdown: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

async fn start_api() -> Api {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::testing(dir.path());
    let resources =
        Arc::new(BackendResources::new(config.build_collection()));
    resources.add(Arc::new(transport(9031)));

    let (shutdown, shutdown_recv) = tokio::sync::watch::channel(false);
    let state = http::AppState::new(
        resources.clone(),
        &config,
        prometheus(),
        shutdown_recv.clone(),
    );

    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::task::spawn(async move {
        http::serve(listener, state, shutdown_recv).await.unwrap();
    });

    Api {
        addr,
        resources,
        shutdown,
        task,
    }
}

fn get_json(
    addr: std::net::SocketAddr,
    path: &str,
    token: Option<&str>,
) -> Result<serde_json::Value, u16> {
    let mut request = ureq::get(&format!("http://{addr}{path}"));
    if let Some(token) = token {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }
    match request.call() {
        Ok(response) => Ok(response.into_json().unwrap()),
        Err(ureq::Error::Status(code, _)) => Err(code),
        Err(err) => panic!("transport error: {err}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_requires_a_valid_token() {
    let api = start_api().await;
    let addr = api.addr;

    let (no_token, bad_token, ok) = tokio::task::spawn_blocking(move || {
        (
            get_json(addr, "/resources?types=obfs4", None),
            get_json(addr, "/resources?types=obfs4", Some("wrong")),
            get_json(addr, "/resources?types=obfs4", Some("test-token")),
        )
    })
    .await
    .unwrap();

    assert_eq!(Err(401), no_token);
    assert_eq!(Err(401), bad_token);
    let snapshot = ok.unwrap();
    assert_eq!(1, snapshot["obfs4"].as_array().unwrap().len());
    assert_eq!(
        "obfs4",
        snapshot["obfs4"][0]["type"].as_str().unwrap(),
    );

    let _ = api.shutdown.send(true);
    let _ = api.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_covers_only_requested_types() {
    let api = start_api().await;
    let addr = api.addr;

    let snapshot = tokio::task::spawn_blocking(move || {
        get_json(addr, "/resources?types=vanilla", Some("test-token"))
    })
    .await
    .unwrap()
    .unwrap();

    assert!(snapshot["vanilla"].as_array().unwrap().is_empty());
    assert!(snapshot.get("obfs4").is_none());

    let _ = api.shutdown.send(true);
    let _ = api.task.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_sends_prime_then_diffs() {
    let api = start_api().await;
    let addr = api.addr;

    let (line_send, mut line_recv) =
        tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let response = ureq::get(&format!(
            "http://{addr}/resource-stream?types=obfs4"
        ))
        .set("Authorization", "Bearer test-token")
        .call()
        .unwrap();
        let reader = std::io::BufReader::new(response.into_reader());
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line_send.send(line).is_err() {
                break;
            }
        }
    });

    let timeout = std::time::Duration::from_secs(10);

    // the first frame primes the subscriber with everything owned
    let prime = tokio::time::timeout(timeout, line_recv.recv())
        .await
        .unwrap()
        .unwrap();
    let prime: serde_json::Value = serde_json::from_str(&prime).unwrap();
    assert_eq!(1, prime["new"]["obfs4"].as_array().unwrap().len());

    // a fresh resource arrives as a new-diff frame
    let second = Arc::new(transport(9032));
    api.resources.add(second.clone());
    let frame = tokio::time::timeout(timeout, line_recv.recv())
        .await
        .unwrap()
        .unwrap();
    let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
    let entry = &frame["new"]["obfs4"][0];
    assert_eq!(9032, entry["port"].as_u64().unwrap());
    assert_eq!(FP, entry["fingerprint"].as_str().unwrap());
    assert!(frame["changed"].as_object().unwrap().is_empty());
    assert_eq!(
        second.uid(),
        culvert_resources::decode_resource("obfs4", entry)
            .unwrap()
            .uid(),
    );

    // server shutdown ends the stream and drains the subscriber
    let _ = api.shutdown.send(true);
    let _ = api.task.await;
    assert!(tokio::time::timeout(timeout, line_recv.recv())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_and_metrics_respond() {
    let api = start_api().await;
    let addr = api.addr;

    let (health, metrics_body) = tokio::task::spawn_blocking(move || {
        let health = get_json(addr, "/health", None).unwrap();
        // one authorized snapshot so the request counter has a sample
        get_json(addr, "/resources?types=obfs4", Some("test-token"))
            .unwrap();
        let metrics_body = ureq::get(&format!("http://{addr}/metrics"))
            .call()
            .unwrap()
            .into_string()
            .unwrap();
        (health, metrics_body)
    })
    .await
    .unwrap();

    assert_eq!(serde_json::json!({}), health);
    assert!(metrics_body.contains("culvert_backend_requests_total"));

    let _ = api.shutdown.send(true);
    let _ = api.task.await;
}
