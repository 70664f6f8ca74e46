#![allow(dead_code)]

use awsmock_proxy::{
    Body, MockCatalog, MockProxy, ProxyBuilder, ProxyEndpoint, RelayScheme,
    builder::Configurable,
    hyper::{
        Method, Request, Response, StatusCode,
        body::{Bytes, Incoming},
        server::conn::http1,
        service::service_fn,
    },
    hyper_util::{
        client::legacy::{
            Client,
            connect::{Connect, HttpConnector, dns::Name},
        },
        rt::{TokioExecutor, TokioIo},
    },
};
use http_body_util::Full;
use serde_json::{Value, json};
use std::{convert::Infallible, io, iter, net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot::{self, Sender},
};

pub const HELLO_WORLD: &str = "Hello, World!";

async fn test_server(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/hello") => Ok(Response::new(Full::new(Bytes::from_static(
            HELLO_WORLD.as_bytes(),
        )))),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::default())
            .unwrap()),
    }
}

pub async fn start_http_server() -> Result<(SocketAddr, Sender<()>), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    let (tx, mut rx) = oneshot::channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                res = listener.accept() => {
                    let Ok((tcp, _)) = res else { continue };
                    tokio::spawn(
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(tcp), service_fn(test_server)),
                    );
                }
                _ = &mut rx => break,
            }
        }
    });

    Ok((addr, tx))
}

/// A TCP server that writes back whatever it reads.
pub async fn start_echo_server() -> Result<(SocketAddr, Sender<()>), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    let (tx, mut rx) = oneshot::channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                res = listener.accept() => {
                    let Ok((mut tcp, _)) = res else { continue };
                    tokio::spawn(async move {
                        let (mut reader, mut writer) = tcp.split();
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    });
                }
                _ = &mut rx => break,
            }
        }
    });

    Ok((addr, tx))
}

pub fn catalog() -> Value {
    json!({
        "version": "1",
        "services": {
            "s3": {
                "buckets": {
                    "my-bucket": {
                        "objects": {
                            "hello.txt": { "content": "X" },
                            "report.csv": {
                                "content": "a,b\n1,2\n",
                                "metadata": { "ContentType": "text/csv", "owner": "qa" }
                            }
                        }
                    }
                }
            },
            "dynamodb": {
                "tables": {
                    "users": { "items": [{ "id": { "S": "u-1" } }] }
                }
            },
            "lambda": {
                "functions": {
                    "hello": { "response": { "statusCode": 200, "body": "hi" } }
                }
            }
        }
    })
}

async fn launch<C>(
    builder: ProxyBuilder<Configurable<C>>,
    catalog: Value,
) -> Result<(MockProxy<C>, ProxyEndpoint), Box<dyn std::error::Error>>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let mut proxy = builder
        .with_relay_scheme(RelayScheme::Preserve)
        .with_tunnel_close_delay(Duration::ZERO)
        .with_header_timeout(Duration::from_secs(5))
        .build();

    let endpoint = proxy.start(MockCatalog::from_value(catalog)?).await?;

    Ok((proxy, endpoint))
}

pub async fn start_proxy(
    catalog: Value,
) -> Result<
    (
        MockProxy<impl Connect + Clone + Send + Sync + 'static>,
        ProxyEndpoint,
    ),
    Box<dyn std::error::Error>,
> {
    let builder = MockProxy::builder()
        .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_rustls_client();

    launch(builder, catalog).await
}

/// Start a proxy whose relay client resolves every hostname to `origin`.
pub async fn start_proxy_resolving_to(
    catalog: Value,
    origin: SocketAddr,
) -> Result<
    (
        MockProxy<impl Connect + Clone + Send + Sync + 'static>,
        ProxyEndpoint,
    ),
    Box<dyn std::error::Error>,
> {
    let resolver =
        tower::service_fn(move |_: Name| async move { Ok::<_, io::Error>(iter::once(origin)) });
    let client: Client<_, Body> = Client::builder(TokioExecutor::new())
        .build(HttpConnector::new_with_resolver(resolver));

    let builder = MockProxy::builder()
        .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_client(client);

    launch(builder, catalog).await
}

pub fn build_client(endpoint: &ProxyEndpoint) -> reqwest::Client {
    let proxy = reqwest::Proxy::all(endpoint.proxy_url()).unwrap();

    reqwest::Client::builder().proxy(proxy).build().unwrap()
}

/// Open a `CONNECT` tunnel through the proxy and return the stream with the proxy's reply head.
pub async fn connect(endpoint: &ProxyEndpoint, authority: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(endpoint.addr).await.unwrap();
    stream
        .write_all(
            format!(
                "CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n",
                authority, authority
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Read up to and including the blank line ending a response head. Empty on EOF.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0; 1];

    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }

    String::from_utf8(head).unwrap()
}
