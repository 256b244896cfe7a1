//! The nodeforge serving binary: composition root, HTTP(S) endpoint, TLS
//! rotation, and the bootstrap config source. All pure config processing
//! lives in `nodeforge-config`.

pub mod app_context;
pub mod cli;
pub mod config_source;
pub mod server;
pub mod termination;
