mod internal;

pub mod builder;

use crate::{Body, Error, catalog::MockCatalog, mock::MockEngine, tunnel::TunnelSettings};
use builder::WantsAddr;
use hyper::service::service_fn;
use hyper_util::{
    client::legacy::{Client, connect::Connect},
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use internal::InternalProxy;
use std::{net::SocketAddr, pin::pin, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{debug, error, info, warn};

pub use builder::ProxyBuilder;

/// Port the proxy listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 4566;

pub const DEFAULT_SHUTDOWN_LIMIT: Duration = Duration::from_secs(5);

/// Scheme used when relaying plain requests to their origin.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RelayScheme {
    /// Always contact the origin over HTTPS.
    #[default]
    Https,
    /// Keep the scheme of the proxied request.
    Preserve,
}

/// Where a started proxy can be reached.
///
/// Clients are pointed at the proxy through [`ProxyEndpoint::env_vars`]; the proxy itself never
/// touches the process environment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProxyEndpoint {
    pub addr: SocketAddr,
}

impl ProxyEndpoint {
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Proxy variables a client process should be started with.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let url = self.proxy_url();

        ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"]
            .into_iter()
            .map(|name| (name, url.clone()))
            .collect()
    }
}

struct Running {
    endpoint: ProxyEndpoint,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A mock proxy server. This must be constructed with a [`ProxyBuilder`].
///
/// # Examples
///
/// ```rust,no_run
/// use awsmock_proxy::{MockCatalog, MockProxy};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), awsmock_proxy::Error> {
/// let mut proxy = MockProxy::builder()
///     .with_addr(std::net::SocketAddr::from(([127, 0, 0, 1], 0)))
///     .with_rustls_client()
///     .build();
///
/// let endpoint = proxy.start(MockCatalog::from_path("mocks.json")?).await?;
/// println!("proxy listening on {}", endpoint.proxy_url());
///
/// // Do something else...
///
/// proxy.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MockProxy<C> {
    addr: SocketAddr,
    client: Client<C, Body>,
    engine: MockEngine,
    tunnel: TunnelSettings,
    relay_scheme: RelayScheme,
    shutdown_limit: Duration,
    catalog: watch::Sender<Arc<MockCatalog>>,
    running: Option<Running>,
}

impl MockProxy<()> {
    /// Create a new [`ProxyBuilder`].
    pub fn builder() -> ProxyBuilder<WantsAddr> {
        ProxyBuilder::new()
    }
}

impl<C> MockProxy<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Bind the listening socket and start serving `catalog`.
    ///
    /// # Errors
    ///
    /// Fails if the proxy is already running or the address cannot be bound.
    pub async fn start(&mut self, catalog: MockCatalog) -> Result<ProxyEndpoint, Error> {
        if let Some(running) = &self.running {
            return Err(Error::AlreadyRunning(running.endpoint.addr));
        }

        let listener = TcpListener::bind(self.addr).await?;
        let endpoint = ProxyEndpoint {
            addr: listener.local_addr()?,
        };

        self.update_config(catalog);

        let (stop, stopped) = oneshot::channel::<()>();
        let shutdown = Shutdown::new(async move {
            stopped.await.unwrap_or_default();
        });

        let acceptor = Acceptor {
            listener,
            client: self.client.clone(),
            engine: self.engine.clone(),
            tunnel: self.tunnel.clone(),
            relay_scheme: self.relay_scheme,
            catalog: self.catalog.subscribe(),
        };
        shutdown.spawn_task_fn(move |guard| acceptor.run(guard));

        let limit = self.shutdown_limit;
        let task = tokio::spawn(async move {
            match shutdown.shutdown_with_limit(limit).await {
                Ok(elapsed) => debug!(?elapsed, "proxy shut down"),
                Err(e) => warn!("Proxy shutdown did not complete: {}", e),
            }
        });

        info!(addr = %endpoint.addr, "mock proxy listening");
        self.running = Some(Running {
            endpoint,
            stop,
            task,
        });

        Ok(endpoint)
    }

    /// Stop accepting connections and close the listening socket.
    ///
    /// Calling this on a proxy that is not running does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("stop called on a proxy that is not running");
            return;
        };

        let _ = running.stop.send(());
        if let Err(e) = running.task.await {
            error!("Proxy task failed: {}", e);
        }

        info!(addr = %running.endpoint.addr, "mock proxy stopped");
    }
}

impl<C> MockProxy<C> {
    /// Replace the catalog used for subsequent requests.
    ///
    /// Requests already in flight keep the catalog they started with.
    pub fn update_config(&self, catalog: MockCatalog) {
        info!(version = catalog.version(), "loading mock catalog");
        self.catalog.send_replace(Arc::new(catalog));
    }

    /// The catalog new requests are served from.
    pub fn catalog(&self) -> Arc<MockCatalog> {
        Arc::clone(&self.catalog.borrow())
    }

    pub fn endpoint(&self) -> Option<ProxyEndpoint> {
        self.running.as_ref().map(|running| running.endpoint)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl<C> Drop for MockProxy<C> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop.send(());
        }
    }
}

struct Acceptor<C> {
    listener: TcpListener,
    client: Client<C, Body>,
    engine: MockEngine,
    tunnel: TunnelSettings,
    relay_scheme: RelayScheme,
    catalog: watch::Receiver<Arc<MockCatalog>>,
}

impl<C> Acceptor<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn run(self, guard: ShutdownGuard) {
        let mut server = auto::Builder::new(TokioExecutor::new());
        server
            .http1()
            .title_case_headers(true)
            .preserve_header_case(true);

        loop {
            tokio::select! {
                res = self.listener.accept() => {
                    let (tcp, client_addr) = match res {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept incoming connection: {}", e);
                            continue;
                        }
                    };

                    self.serve(&guard, &server, tcp, client_addr);
                }
                _ = guard.cancelled() => break,
            }
        }

        debug!("listener closed");
    }

    fn serve(
        &self,
        guard: &ShutdownGuard,
        server: &auto::Builder<TokioExecutor>,
        tcp: tokio::net::TcpStream,
        client_addr: SocketAddr,
    ) {
        let server = server.clone();
        let client = self.client.clone();
        let engine = self.engine.clone();
        let tunnel = self.tunnel.clone();
        let relay_scheme = self.relay_scheme;
        let catalog = self.catalog.clone();

        guard.spawn_task_fn(move |guard| async move {
            let service = service_fn(move |req| {
                InternalProxy {
                    client: client.clone(),
                    catalog: Arc::clone(&catalog.borrow()),
                    engine: engine.clone(),
                    tunnel: tunnel.clone(),
                    relay_scheme,
                    client_addr,
                }
                .proxy(req)
            });

            let mut conn = pin!(server.serve_connection_with_upgrades(TokioIo::new(tcp), service));

            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        debug!("Connection from {} ended with error: {}", client_addr, e);
                    }
                }
                _ = guard.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.await {
                        debug!("Connection from {} ended with error: {}", client_addr, e);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_env_vars_point_at_proxy() {
        let endpoint = ProxyEndpoint {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
        };

        assert_eq!(endpoint.proxy_url(), "http://127.0.0.1:4566");

        let vars = endpoint.env_vars();
        assert_eq!(vars.len(), 4);
        assert!(vars.iter().all(|(_, value)| value == "http://127.0.0.1:4566"));
        assert!(vars.iter().any(|(name, _)| *name == "HTTPS_PROXY"));
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let mut proxy = MockProxy::builder()
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_rustls_client()
            .build();

        proxy.stop().await;
        proxy.stop().await;

        assert!(!proxy.is_running());
        assert_eq!(proxy.endpoint(), None);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let mut proxy = MockProxy::builder()
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_rustls_client()
            .build();

        let endpoint = proxy.start(MockCatalog::default()).await.unwrap();

        assert!(matches!(
            proxy.start(MockCatalog::default()).await,
            Err(Error::AlreadyRunning(addr)) if addr == endpoint.addr
        ));

        proxy.stop().await;
    }

    #[tokio::test]
    async fn update_config_swaps_whole_catalog() {
        let proxy = MockProxy::builder()
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_rustls_client()
            .build();

        let before = proxy.catalog();
        proxy.update_config(MockCatalog::from_json(r#"{"version": "2"}"#).unwrap());
        let after = proxy.catalog();

        assert_eq!(before.version(), "");
        assert_eq!(after.version(), "2");
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&after, &proxy.catalog()));
    }
}
