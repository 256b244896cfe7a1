//! Serving-certificate rotation.
//!
//! The certificate and key live behind an [`ArcSwap`]; new TLS handshakes
//! read whatever material is current, so rotation never needs a restart. A
//! filesystem watcher reloads the pair when either file changes (secret
//! mounts swap whole directories, so the parent directories are watched).

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use miette::{miette, Context, IntoDiagnostic};
use notify::{Event, RecursiveMode, Watcher};
use pingora::listeners::TlsAccept;
use pingora::tls::ext;
use pingora::tls::pkey::{PKey, Private};
use pingora::tls::ssl::SslRef;
use pingora::tls::x509::X509;
use tokio::sync::mpsc;

/// A loaded certificate chain and private key.
pub struct TlsMaterial {
    certs: Vec<X509>,
    key: PKey<Private>,
}

impl TlsMaterial {
    pub fn load(cert_path: &Path, key_path: &Path) -> miette::Result<TlsMaterial> {
        let cert_pem = std::fs::read(cert_path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read serving cert {cert_path:?}"))?;
        let certs = X509::stack_from_pem(&cert_pem)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to parse serving cert {cert_path:?}"))?;
        if certs.is_empty() {
            return Err(miette!("no certificates found in {cert_path:?}"));
        }

        let key_pem = std::fs::read(key_path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read serving key {key_path:?}"))?;
        let key = PKey::private_key_from_pem(&key_pem)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to parse serving key {key_path:?}"))?;

        Ok(TlsMaterial { certs, key })
    }
}

pub type SharedTlsMaterial = Arc<ArcSwap<TlsMaterial>>;

/// The per-handshake getter hook: installs whatever material is current.
pub struct ReloadingCertResolver {
    state: SharedTlsMaterial,
}

#[async_trait]
impl TlsAccept for ReloadingCertResolver {
    async fn certificate_callback(&self, ssl: &mut SslRef) {
        let material = self.state.load();
        if let Err(err) = install(ssl, &material) {
            tracing::error!("failed to install serving certificate: {err}");
        }
    }
}

fn install(ssl: &mut SslRef, material: &TlsMaterial) -> pingora::Result<()> {
    let (leaf, chain) = material
        .certs
        .split_first()
        .expect("material always holds at least one certificate");
    ext::ssl_use_certificate(ssl, leaf)?;
    ext::ssl_use_private_key(ssl, &material.key)?;
    for cert in chain {
        ext::ssl_add_chain_cert(ssl, cert)?;
    }
    Ok(())
}

pub struct CertWatcher {
    state: SharedTlsMaterial,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertWatcher {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> miette::Result<Self> {
        let material = TlsMaterial::load(&cert_path, &key_path)?;
        Ok(Self {
            state: Arc::new(ArcSwap::from_pointee(material)),
            cert_path,
            key_path,
        })
    }

    pub fn resolver(&self) -> ReloadingCertResolver {
        ReloadingCertResolver {
            state: self.state.clone(),
        }
    }

    pub async fn watch(&mut self) -> Result<Infallible, Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(cert = ?self.cert_path, key = ?self.key_path, "starting certificate watcher");

        let (tx, mut rx) = mpsc::channel(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                    let _ = tx.blocking_send(event);
                }
            }
        })?;

        let cert_dir = parent_dir(&self.cert_path);
        watcher.watch(cert_dir, RecursiveMode::NonRecursive)?;
        let key_dir = parent_dir(&self.key_path);
        if key_dir != cert_dir {
            watcher.watch(key_dir, RecursiveMode::NonRecursive)?;
        }

        loop {
            if rx.recv().await.is_some() {
                // Let the rotation settle, then drain the burst of events.
                tokio::time::sleep(Duration::from_millis(100)).await;
                while rx.try_recv().is_ok() {}

                match TlsMaterial::load(&self.cert_path, &self.key_path) {
                    Ok(material) => {
                        self.state.store(Arc::new(material));
                        tracing::info!("reloaded serving certificate");
                    }
                    Err(err) => tracing::warn!(
                        "failed to reload serving certificate: {err}. Keeping previous material."
                    ),
                }
            }
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}
