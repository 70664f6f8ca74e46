use crate::{
    Body,
    catalog::MockCatalog,
    mock::{GeneratorDefaults, MockEngine},
    proxy::{DEFAULT_PORT, DEFAULT_SHUTDOWN_LIMIT, MockProxy, RelayScheme},
    tunnel::TunnelSettings,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{
        Client,
        connect::{Connect, HttpConnector},
    },
    rt::TokioExecutor,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;

/// A builder for creating a [`MockProxy`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyBuilder<T>(T);

/// Builder state that needs an address to listen on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WantsAddr(());

impl ProxyBuilder<WantsAddr> {
    /// Create a new ProxyBuilder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address to listen on. Port `0` picks a free port.
    pub fn with_addr(self, addr: SocketAddr) -> ProxyBuilder<WantsClient> {
        ProxyBuilder(WantsClient { addr })
    }

    /// Listen on the loopback interface at [`DEFAULT_PORT`].
    pub fn with_default_addr(self) -> ProxyBuilder<WantsClient> {
        self.with_addr(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}

impl Default for ProxyBuilder<WantsAddr> {
    fn default() -> Self {
        ProxyBuilder(WantsAddr(()))
    }
}

/// Builder state that needs a client for relaying to origins.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WantsClient {
    addr: SocketAddr,
}

impl ProxyBuilder<WantsClient> {
    /// Relay through a hyper-rustls connector trusting the webpki roots.
    pub fn with_rustls_client(self) -> ProxyBuilder<Configurable<HttpsConnector<HttpConnector>>> {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        self.with_client(
            Client::builder(TokioExecutor::new())
                .http1_title_case_headers(true)
                .http1_preserve_header_case(true)
                .build(https),
        )
    }

    /// Use a custom client.
    pub fn with_client<C>(self, client: Client<C, Body>) -> ProxyBuilder<Configurable<C>>
    where
        C: Connect + Clone + Send + Sync + 'static,
    {
        ProxyBuilder(Configurable {
            addr: self.0.addr,
            client,
            defaults: GeneratorDefaults::default(),
            tunnel: TunnelSettings::default(),
            relay_scheme: RelayScheme::default(),
            shutdown_limit: DEFAULT_SHUTDOWN_LIMIT,
        })
    }
}

/// Builder state with everything required; the remaining settings have defaults.
#[derive(Debug)]
pub struct Configurable<C> {
    addr: SocketAddr,
    client: Client<C, Body>,
    defaults: GeneratorDefaults,
    tunnel: TunnelSettings,
    relay_scheme: RelayScheme,
    shutdown_limit: Duration,
}

impl<C> ProxyBuilder<Configurable<C>>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Largest request head accepted on an intercepted tunnel.
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.0.tunnel.max_header_bytes = max_header_bytes;
        self
    }

    /// How long an intercepted tunnel waits for a complete request head.
    pub fn with_header_timeout(mut self, header_timeout: Duration) -> Self {
        self.0.tunnel.header_timeout = header_timeout;
        self
    }

    /// Pause between flushing a tunnel response and closing the socket.
    pub fn with_tunnel_close_delay(mut self, close_delay: Duration) -> Self {
        self.0.tunnel.close_delay = close_delay;
        self
    }

    /// Table answered by DynamoDB `GetItem` when the catalog names none.
    pub fn with_default_table(mut self, table: impl Into<String>) -> Self {
        self.0.defaults.table = Some(table.into());
        self
    }

    /// Function answered by Lambda `Invoke` when the catalog names none.
    pub fn with_default_function(mut self, function: impl Into<String>) -> Self {
        self.0.defaults.function = Some(function.into());
        self
    }

    /// Scheme used when relaying plain requests. Defaults to [`RelayScheme::Https`].
    pub fn with_relay_scheme(mut self, relay_scheme: RelayScheme) -> Self {
        self.0.relay_scheme = relay_scheme;
        self
    }

    /// Upper bound on how long [`MockProxy::stop`] waits for open connections.
    pub fn with_shutdown_limit(mut self, shutdown_limit: Duration) -> Self {
        self.0.shutdown_limit = shutdown_limit;
        self
    }

    /// Build the proxy. It serves an empty catalog until started.
    pub fn build(self) -> MockProxy<C> {
        let (catalog, _) = watch::channel(Arc::new(MockCatalog::default()));

        MockProxy {
            addr: self.0.addr,
            client: self.0.client,
            engine: MockEngine::new(self.0.defaults),
            tunnel: self.0.tunnel,
            relay_scheme: self.0.relay_scheme,
            shutdown_limit: self.0.shutdown_limit,
            catalog,
            running: None,
        }
    }
}
