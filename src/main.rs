use awsmock_proxy::{DEFAULT_PORT, Error, MockCatalog, MockProxy, RelayScheme, tunnel};
use clap::{Parser, ValueEnum};
use hyper_util::client::legacy::connect::Connect;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemeArg {
    /// Relay every plain request over HTTPS.
    Https,
    /// Relay with the scheme the client used.
    Preserve,
}

impl From<SchemeArg> for RelayScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Https => RelayScheme::Https,
            SchemeArg::Preserve => RelayScheme::Preserve,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "awsmock-proxy", about = "Answer AWS API calls from a local mock catalog")]
struct Cli {
    /// JSON mock catalog. Without one every request is relayed.
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    addr: SocketAddr,

    /// Log filter, used when `RUST_LOG` is not set.
    #[arg(long, default_value = "awsmock_proxy=info")]
    log: String,

    #[arg(long, value_enum, default_value_t = SchemeArg::Https)]
    relay_scheme: SchemeArg,

    #[arg(long, default_value_t = tunnel::DEFAULT_MAX_HEADER_BYTES)]
    max_header_bytes: usize,

    /// Seconds an intercepted tunnel waits for its request head.
    #[arg(long, default_value_t = tunnel::DEFAULT_HEADER_TIMEOUT.as_secs())]
    header_timeout: u64,

    #[arg(long)]
    default_table: Option<String>,

    #[arg(long)]
    default_function: Option<String>,
}

fn load(path: Option<&Path>) -> Result<MockCatalog, Error> {
    match path {
        Some(path) => Ok(MockCatalog::from_path(path)?),
        None => Ok(MockCatalog::default()),
    }
}

#[cfg(unix)]
async fn reload_on_hangup<C>(proxy: &MockProxy<C>, path: Option<&Path>) -> Result<(), Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    while hangup.recv().await.is_some() {
        match load(path) {
            Ok(catalog) => proxy.update_config(catalog),
            Err(e) => error!("Keeping current catalog, reload failed: {}", e),
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn reload_on_hangup<C>(_proxy: &MockProxy<C>, _path: Option<&Path>) -> Result<(), Error> {
    std::future::pending().await
}

async fn run<C>(mut proxy: MockProxy<C>, path: Option<&Path>) -> Result<(), Error>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let endpoint = proxy.start(load(path)?).await?;

    for (name, value) in endpoint.env_vars() {
        println!("export {}={}", name, value);
    }

    let stopped = tokio::select! {
        res = tokio::signal::ctrl_c() => res.map_err(Error::from),
        res = reload_on_hangup(&proxy, path) => res,
    };

    info!("shutting down");
    proxy.stop().await;

    stopped
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .init();

    let mut builder = MockProxy::builder()
        .with_addr(cli.addr)
        .with_rustls_client()
        .with_relay_scheme(cli.relay_scheme.into())
        .with_max_header_bytes(cli.max_header_bytes)
        .with_header_timeout(Duration::from_secs(cli.header_timeout));

    if let Some(table) = cli.default_table {
        builder = builder.with_default_table(table);
    }
    if let Some(function) = cli.default_function {
        builder = builder.with_default_function(function);
    }

    run(builder.build(), cli.catalog.as_deref()).await
}
