use std::fs::File;
use std::io::Write;
use std::thread;

use reqwest::Client;
use tempfile::TempDir;

use nodeforge::app_context::AppContext;

use crate::common::test_setup::{get_free_port, insecure_cli, wait_for_service};

const WORKER_BASE: &str = r#"
name: 00-worker
labels:
  nodeforge.dev/role: worker
kernelArguments: ["nosmt"]
config:
  ignition:
    version: 3.2.0
  storage:
    files:
      - path: /etc/pool-marker
        mode: 420
        contents:
          source: "data:,base"
  systemd:
    units:
      - name: marker.service
        enabled: true
        contents: "[Unit]\nDescription=marker"
"#;

const WORKER_OVERRIDE: &str = r#"
name: 99-worker-override
labels:
  nodeforge.dev/role: worker
config:
  ignition:
    version: 3.2.0
  storage:
    files:
      - path: /etc/pool-marker
        contents:
          source: "data:,override"
"#;

fn write_manifests(dir: &TempDir) {
    for (name, contents) in [
        ("00-worker.yaml", WORKER_BASE),
        ("99-worker-override.yaml", WORKER_OVERRIDE),
    ] {
        let mut file = File::create(dir.path().join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }
}

async fn start_server(dir: &TempDir) -> String {
    let port = get_free_port();
    let cli = insecure_cli(dir.path().to_path_buf(), port);

    let mut ctx = AppContext::bootstrap(cli).await.expect("Bootstrap failed");
    let services = ctx.build_services().await.expect("Build services failed");
    let (mut server, _watcher) = ctx.ready();

    server.bootstrap();
    server.add_services(services);
    thread::spawn(move || {
        server.run_forever();
    });

    let base = format!("http://127.0.0.1:{}", port);
    wait_for_service(&format!("{}/healthz", base)).await;
    base
}

#[tokio::test]
async fn serves_negotiated_v3_config() {
    let dir = tempfile::tempdir().unwrap();
    write_manifests(&dir);
    let base = start_server(&dir).await;

    let resp = Client::new()
        .get(format!("{}/config/worker", base))
        .header(
            "Accept",
            "application/vnd.coreos.ignition+json;version=3.2.0, */*;q=0.1",
        )
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ignition"]["version"], "3.2.0");

    let files = body["storage"]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["path"], "/etc/pool-marker");
    // later fragment wins, overwrite is defaulted, compression stays absent
    assert_eq!(files[0]["contents"]["source"], "data:,override");
    assert_eq!(files[0]["overwrite"], true);
    assert!(files[0]["contents"].get("compression").is_none());

    let units = body["systemd"]["units"].as_array().unwrap();
    assert_eq!(units[0]["name"], "marker.service");
}

#[tokio::test]
async fn defaults_to_v2_without_accept_header() {
    let dir = tempfile::tempdir().unwrap();
    write_manifests(&dir);
    let base = start_server(&dir).await;

    let resp = Client::new()
        .get(format!("{}/config/worker", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ignition"]["version"], "2.2.0");
    let files = body["storage"]["files"].as_array().unwrap();
    assert_eq!(files[0]["filesystem"], "root");
}

#[tokio::test]
async fn unknown_pool_is_404() {
    let dir = tempfile::tempdir().unwrap();
    write_manifests(&dir);
    let base = start_server(&dir).await;

    let resp = Client::new()
        .get(format!("{}/config/ghost", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn unsupported_accept_version_is_400() {
    let dir = tempfile::tempdir().unwrap();
    write_manifests(&dir);
    let base = start_server(&dir).await;

    let resp = Client::new()
        .get(format!("{}/config/worker", base))
        .header("Accept", "application/vnd.coreos.ignition+json;version=4.0.0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn health_endpoint_and_backstops() {
    let dir = tempfile::tempdir().unwrap();
    write_manifests(&dir);
    let base = start_server(&dir).await;
    let client = Client::new();

    let resp = client.get(format!("{}/healthz", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/healthz", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);

    let resp = client
        .get(format!("{}/definitely-not-a-route", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn head_returns_headers_only() {
    let dir = tempfile::tempdir().unwrap();
    write_manifests(&dir);
    let base = start_server(&dir).await;

    let resp = Client::new()
        .head(format!("{}/config/worker", base))
        .header(
            "Accept",
            "application/vnd.coreos.ignition+json;version=3.2.0",
        )
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let length: usize = resp
        .headers()
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(length > 0);
    assert!(resp.bytes().await.unwrap().is_empty());
}
