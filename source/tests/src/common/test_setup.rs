use std::net::TcpListener;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use pingora::server::Server;
use pingora::services::Service;
use reqwest::Client;

use nodeforge::app_context::{pingora_opt, pingora_server_conf};
use nodeforge::cli::Cli;

pub fn get_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_service(url: &str) {
    let client = Client::new();
    for _ in 0..50 {
        if client.get(url).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Service at {} did not start in time", url);
}

/// A CLI for an insecure listener on localhost, serving `manifests_dir`.
pub fn insecure_cli(manifests_dir: PathBuf, port: u16) -> Cli {
    Cli {
        address: "127.0.0.1".to_string(),
        port: 0,
        insecure_port: port,
        insecure: true,
        cert: None,
        key: None,
        manifests_dir,
        apiserver_manifest: PathBuf::from("/nonexistent/apiserver.yaml"),
        base_os_image: String::new(),
        extensions_image: String::new(),
        release_version: String::new(),
        threads_per_service: Some(1),
    }
}

/// Boots a pingora server with the given services on a background thread.
pub fn spawn_server(cli: &Cli, services: Vec<Box<dyn Service>>) {
    let mut server = Server::new_with_opt_and_conf(pingora_opt(), pingora_server_conf(cli));
    server.bootstrap();
    server.add_services(services);
    thread::spawn(move || {
        server.run_forever();
    });
}
