use std::sync::Arc;

use miette::miette;
use pingora::apps::http_app::HttpServer;
use pingora::server::configuration::{Opt as PingoraOpt, ServerConf as PingoraServerConf};
use pingora::server::Server;
use pingora::services::Service;

use nodeforge_config::fragment::OsImageUrlConfig;
use nodeforge_config::DialectConverter;

use crate::cli::Cli;
use crate::config_source::{BootstrapConfigSource, ConfigSource};
use crate::server::cert_watcher::CertWatcher;
use crate::server::{tls, ConfigServerApp};

/// The [`Opt`][PingoraOpt] field for Pingora.
pub fn pingora_opt() -> PingoraOpt {
    PingoraOpt {
        upgrade: false,
        daemon: false,
        nocapture: false,
        test: false,
        conf: None,
    }
}

/// The [`ServerConf`][PingoraServerConf] field for Pingora.
pub fn pingora_server_conf(cli: &Cli) -> PingoraServerConf {
    PingoraServerConf {
        threads: cli.threads_per_service.unwrap_or(8),
        ..PingoraServerConf::default()
    }
}

pub struct AppContext {
    cli: Cli,
    converter: DialectConverter,
    source: Arc<dyn ConfigSource>,
    cert_watcher: Option<CertWatcher>,
    server: Server,
}

impl AppContext {
    pub async fn bootstrap(cli: Cli) -> miette::Result<AppContext> {
        let converter = DialectConverter::new();

        let defaults = OsImageUrlConfig {
            base_os_image: cli.base_os_image.clone(),
            extensions_image: cli.extensions_image.clone(),
            release_version: cli.release_version.clone(),
        };
        tracing::info!(manifests_dir = ?cli.manifests_dir, "serving fragments from disk");
        let source = Arc::new(BootstrapConfigSource::new(
            cli.manifests_dir.clone(),
            defaults,
            converter.clone(),
        ));

        let cert_watcher = match (&cli.cert, &cli.key) {
            (Some(cert), Some(key)) => Some(CertWatcher::new(cert.clone(), key.clone())?),
            (None, None) => None,
            _ => return Err(miette!("--cert and --key must be provided together")),
        };

        let server = Server::new_with_opt_and_conf(pingora_opt(), pingora_server_conf(&cli));

        Ok(AppContext {
            cli,
            converter,
            source,
            cert_watcher,
            server,
        })
    }

    pub async fn build_services(&mut self) -> miette::Result<Vec<Box<dyn Service>>> {
        let app = ConfigServerApp::new(self.source.clone(), self.converter.clone());
        let mut service = pingora::services::listening::Service::new(
            "config-server".to_string(),
            HttpServer::new_app(app),
        );

        let mut listeners = 0;
        if let Some(watcher) = &self.cert_watcher {
            let profile = tls::load_bootstrap_tls_profile(&self.cli.apiserver_manifest)?;
            let settings = tls::build_tls_settings(watcher.resolver(), profile.as_ref())?;
            let addr = format!("{}:{}", self.cli.address, self.cli.port);
            tracing::info!(%addr, "configuring TLS listener");
            service.add_tls_with_settings(&addr, None, settings);
            listeners += 1;
        }
        if self.cli.insecure {
            let addr = format!("{}:{}", self.cli.address, self.cli.insecure_port);
            tracing::info!(%addr, "configuring plaintext listener");
            service.add_tcp(&addr);
            listeners += 1;
        }
        if listeners == 0 {
            return Err(miette!(
                "no listeners configured: provide --cert/--key, or --insecure"
            ));
        }

        Ok(vec![Box::new(service)])
    }

    pub fn ready(self) -> (Server, Option<CertWatcher>) {
        (self.server, self.cert_watcher)
    }
}
