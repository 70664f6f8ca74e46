use crate::{catalog::CatalogError, tunnel::TunnelError};
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid mock catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("network error: {0}")]
    Network(#[from] hyper::Error),
    #[error("failed to relay request: {0}")]
    Relay(#[from] hyper_util::client::legacy::Error),
    #[error("invalid request: {0}")]
    Http(#[from] http::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("proxy is already running on {0}")]
    AlreadyRunning(SocketAddr),
}
