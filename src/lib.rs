//! A local forward proxy that answers AWS API calls from a mock catalog.
//!
//! Clients are pointed at the proxy through the usual `HTTP_PROXY`/`HTTPS_PROXY` variables (see
//! [`ProxyEndpoint::env_vars`]). The proxy then:
//!
//! - Intercepts `CONNECT` tunnels to recognized AWS hosts and answers them with a mock response.
//! - Splices every other `CONNECT` tunnel through to the real origin, untouched.
//! - Answers plain requests for mocked services and relays everything else to the origin.
//!
//! Mock data lives in a [`MockCatalog`], which can be swapped while the proxy is running with
//! [`MockProxy::update_config`].
//!
//! Intercepted tunnels are not TLS-terminated. A client that starts a TLS handshake after
//! `CONNECT` will not be understood; see [`tunnel`] for details.

mod body;
mod error;
mod proxy;

pub mod catalog;
pub mod classify;
pub mod mock;
pub mod operation;
pub mod tunnel;

pub use hyper;
pub use hyper_util;

pub use body::Body;
pub use catalog::{CatalogError, MockCatalog, ServiceConfig, ServiceKey};
pub use classify::{Classification, classify};
pub use error::Error;
pub use mock::{GeneratorDefaults, MockEngine, MockRequest, MockResponse};
pub use operation::extract_operation;
pub use proxy::*;
pub use tunnel::{TunnelError, TunnelSettings};
