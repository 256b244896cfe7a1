//! The HTTP(S) endpoint serving provisioning configs.
//!
//! Three routes: `GET|HEAD /config/<pool>`, `GET|HEAD /healthz`, and a 404
//! backstop. Handlers share nothing mutable; every request resolves its pool,
//! negotiates a dialect version from the Accept header, fetches the rendered
//! config and converts it on the way out.

pub mod accept;
pub mod cert_watcher;
pub mod tls;

use std::sync::Arc;

use async_trait::async_trait;
use http::{header, Method, Response, StatusCode};
use pingora::apps::http_app::ServeHttp;
use pingora::protocols::http::ServerSession;

use nodeforge_config::{dialect, DialectConverter};

use crate::config_source::{ConfigSource, PoolRequest};

/// Port for the TLS listener.
pub const SECURE_PORT: u16 = 22623;
/// Port for the plaintext listener.
pub const INSECURE_PORT: u16 = 22624;

pub struct ConfigServerApp {
    source: Arc<dyn ConfigSource>,
    converter: DialectConverter,
}

impl ConfigServerApp {
    pub fn new(source: Arc<dyn ConfigSource>, converter: DialectConverter) -> Self {
        Self { source, converter }
    }

    async fn serve_config(
        &self,
        session: &ServerSession,
        method: &Method,
        path: &str,
    ) -> Response<Vec<u8>> {
        let pool = basename(path);
        if pool.is_empty() {
            return empty_response(StatusCode::BAD_REQUEST);
        }

        let headers = &session.req_header().headers;
        let user_agent = header_str(headers, header::USER_AGENT);
        let accept_header = header_str(headers, header::ACCEPT);
        let remote = session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        tracing::info!(
            pool,
            %remote,
            user_agent,
            accept_header,
            "pool config requested"
        );

        let version = match accept::detect_spec_version(&self.converter, accept_header) {
            Ok(version) => version,
            Err(err) => {
                tracing::error!(%err, "rejecting request");
                return empty_response(StatusCode::BAD_REQUEST);
            }
        };

        let request = PoolRequest {
            pool: pool.to_string(),
            version: version.clone(),
        };
        let raw = match self.source.get_config(&request).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return empty_response(StatusCode::NOT_FOUND),
            Err(err) => {
                tracing::error!(pool = %request.pool, "couldn't get config: {err:?}");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let body = match dialect::convert_raw_to_version(&raw, &version, &self.converter) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(pool = %request.pool, %version, "couldn't convert config: {err}");
                return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::CONTENT_TYPE, "application/json");
        let body = if method == Method::HEAD { Vec::new() } else { body };
        builder
            .body(body)
            .expect("response with static parts is valid")
    }
}

#[async_trait]
impl ServeHttp for ConfigServerApp {
    async fn response(&self, session: &mut ServerSession) -> Response<Vec<u8>> {
        let method = session.req_header().method.clone();
        let path = session.req_header().uri.path().to_string();

        if method != Method::GET && method != Method::HEAD {
            return empty_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        match path.as_str() {
            "" => empty_response(StatusCode::BAD_REQUEST),
            "/healthz" => empty_response(StatusCode::OK),
            p if p.starts_with("/config/") => self.serve_config(session, &method, p).await,
            _ => empty_response(StatusCode::NOT_FOUND),
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, 0)
        .body(Vec::new())
        .expect("response with static parts is valid")
}

fn header_str(headers: &http::HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Final path segment, ignoring trailing slashes.
fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}
