//! Serving a legacy 2.x document through the full conversion path.

use std::collections::HashMap;
use std::sync::Arc;

use pingora::apps::http_app::HttpServer;
use pingora::services::listening::Service;
use reqwest::Client;

use nodeforge::config_source::StaticConfigSource;
use nodeforge::server::ConfigServerApp;
use nodeforge_config::DialectConverter;

use crate::common::test_setup::{get_free_port, insecure_cli, spawn_server, wait_for_service};

// A 2.x document with a duplicated file; the serve path has to normalize it
// away before translating.
const LEGACY_CONFIG: &str = r#"{
    "ignition": {"version": "2.2.0"},
    "storage": {"files": [
        {"filesystem": "root", "path": "/etc/dup", "contents": {"source": "data:,old"}},
        {"filesystem": "root", "path": "/etc/dup", "contents": {"source": "data:,new"}}
    ]},
    "passwd": {"users": [
        {"name": "core", "sshAuthorizedKeys": ["ssh-ed25519 AAAA key-1"]},
        {"name": "core", "sshAuthorizedKeys": ["ssh-ed25519 AAAA key-2", "ssh-ed25519 AAAA key-1"]}
    ]}
}"#;

#[tokio::test]
async fn legacy_document_is_normalized_and_translated() {
    let port = get_free_port();
    let cli = insecure_cli(std::path::PathBuf::from("/unused"), port);

    let source = StaticConfigSource::new(HashMap::from([(
        "legacy".to_string(),
        LEGACY_CONFIG.as_bytes().to_vec(),
    )]));
    let app = ConfigServerApp::new(Arc::new(source), DialectConverter::new());
    let mut service = Service::new("config-server".to_string(), HttpServer::new_app(app));
    service.add_tcp(&format!("127.0.0.1:{}", port));

    spawn_server(&cli, vec![Box::new(service)]);

    let base = format!("http://127.0.0.1:{}", port);
    wait_for_service(&format!("{}/healthz", base)).await;

    let resp = Client::new()
        .get(format!("{}/config/legacy", base))
        .header(
            "Accept",
            "application/vnd.coreos.ignition+json;version=3.4.0",
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ignition"]["version"], "3.4.0");

    // last-declared file wins
    let files = body["storage"]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["contents"]["source"], "data:,new");

    // SSH keys collapse into one core user, first-seen order kept
    let users = body["passwd"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["name"], "core");
    let keys = users[0]["sshAuthorizedKeys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], "ssh-ed25519 AAAA key-2");
    assert_eq!(keys[1], "ssh-ed25519 AAAA key-1");
}
