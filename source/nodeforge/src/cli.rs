use std::path::PathBuf;

use clap::Parser;

use crate::server::{INSECURE_PORT, SECURE_PORT};

/// Serves effective node provisioning configurations, one per pool.
#[derive(Parser, Debug, Clone)]
#[command(name = "nodeforge", version)]
pub struct Cli {
    /// Address to bind listeners on
    #[arg(long, default_value = "0.0.0.0")]
    pub address: String,

    /// Port for the TLS listener
    #[arg(long, default_value_t = SECURE_PORT)]
    pub port: u16,

    /// Port for the plaintext listener
    #[arg(long, default_value_t = INSECURE_PORT)]
    pub insecure_port: u16,

    /// Also serve without TLS
    #[arg(long)]
    pub insecure: bool,

    /// Serving certificate chain (PEM); TLS is enabled when both --cert and
    /// --key are given
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Serving private key (PEM)
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Directory of fragment manifests to serve from
    #[arg(long, default_value = "/etc/nodeforge/manifests")]
    pub manifests_dir: PathBuf,

    /// API-server manifest carrying the TLS security profile; absence means
    /// defaults
    #[arg(long, default_value = "/etc/nodeforge/apiserver.yaml")]
    pub apiserver_manifest: PathBuf,

    /// Default base OS image, overridable per fragment
    #[arg(long, default_value = "")]
    pub base_os_image: String,

    /// Default extensions image, overridable per fragment
    #[arg(long, default_value = "")]
    pub extensions_image: String,

    /// Release version the image defaults belong to
    #[arg(long, default_value = "")]
    pub release_version: String,

    /// Worker threads per service
    #[arg(long)]
    pub threads_per_service: Option<usize>,
}
