use crate::{
    Body, Error, RelayScheme,
    catalog::MockCatalog,
    classify::classify,
    mock::{MockEngine, MockRequest, MockResponse},
    tunnel::{self, RequestLine, TunnelSession, TunnelSettings},
};
use http::uri::{Authority, Scheme};
use hyper::{
    Method, Request, Response, StatusCode, Uri,
    body::Incoming,
    ext::ReasonPhrase,
    header::{Entry, HOST},
};
use hyper_util::{
    client::legacy::{Client, connect::Connect},
    rt::TokioIo,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{net::TcpStream, task::JoinHandle};
use tracing::{Instrument, Span, debug, error, info, info_span, instrument, warn};

fn bad_request() -> Response<Body> {
    MockResponse::error(StatusCode::BAD_REQUEST, "BadRequest", "request has no target host")
        .into_response()
}

fn internal_error(err: &Error) -> Response<Body> {
    MockResponse::error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "InternalError",
        err.to_string(),
    )
    .into_response()
}

fn connection_established() -> Response<Body> {
    let mut res = Response::new(Body::empty());
    res.extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    res
}

fn spawn_with_trace<T: Send + 'static>(
    fut: impl Future<Output = T> + Send + 'static,
    span: Span,
) -> JoinHandle<T> {
    tokio::spawn(fut.instrument(span))
}

pub(crate) struct InternalProxy<C> {
    pub client: Client<C, Body>,
    /// Snapshot taken when the request arrived; reloads never change it mid-request.
    pub catalog: Arc<MockCatalog>,
    pub engine: MockEngine,
    pub tunnel: TunnelSettings,
    pub relay_scheme: RelayScheme,
    pub client_addr: SocketAddr,
}

impl<C> InternalProxy<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    #[instrument(
        skip_all,
        fields(
            method = %req.method(),
            uri = %req.uri(),
            client_addr = %self.client_addr,
        )
    )]
    pub(crate) async fn proxy(self, req: Request<Incoming>) -> Result<Response<Body>, Error> {
        if req.method() == Method::CONNECT {
            self.process_connect(req).await
        } else {
            Ok(self.route_plain(req).await)
        }
    }

    fn synthesize(&self, host: &str, line: &RequestLine) -> MockResponse {
        let request = MockRequest::new(line.method.clone(), line.path.clone());

        self.engine
            .respond(&self.catalog, host, &request)
            .unwrap_or_else(|| {
                MockResponse::error(
                    StatusCode::NOT_FOUND,
                    "NoMockConfigured",
                    format!("no mock configured for {}", host),
                )
            })
    }

    async fn process_connect<B>(self, req: Request<B>) -> Result<Response<Body>, Error>
    where
        B: Send + 'static,
    {
        let Some(authority) = req.uri().authority().cloned() else {
            return Ok(bad_request());
        };

        if classify(authority.as_str()).recognized {
            info!(host = %authority, "intercepting tunnel");
            self.intercept_tunnel(req, authority);
            return Ok(connection_established());
        }

        let port = authority.port_u16().unwrap_or(443);
        let server = match TcpStream::connect((authority.host(), port)).await {
            Ok(server) => server,
            Err(e) => {
                error!("Failed to connect to {}: {}", authority, e);
                // Failing the service makes hyper drop the client connection.
                return Err(e.into());
            }
        };

        debug!(host = %authority, "splicing tunnel");
        splice(req, server, authority);
        Ok(connection_established())
    }

    fn intercept_tunnel<B>(self, req: Request<B>, authority: Authority)
    where
        B: Send + 'static,
    {
        let span = info_span!("intercept_tunnel", host = %authority);
        let fut = async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let session =
                        TunnelSession::new(authority.host(), self.tunnel.max_header_bytes);

                    if let Err(e) = tunnel::intercept(
                        TokioIo::new(upgraded),
                        session,
                        &self.tunnel,
                        |host, line| self.synthesize(host, line),
                    )
                    .await
                    {
                        warn!("Intercepted tunnel to {} failed: {}", authority, e);
                    }
                }
                Err(e) => error!("Upgrade error: {}", e),
            }
        };

        spawn_with_trace(fut, span);
    }

    async fn route_plain(self, req: Request<Incoming>) -> Response<Body> {
        match self.try_route_plain(req).await {
            Ok(res) => res,
            Err(e) => {
                error!("Failed to handle request: {}", e);
                internal_error(&e)
            }
        }
    }

    async fn try_route_plain(&self, req: Request<Incoming>) -> Result<Response<Body>, Error> {
        let Some(host) = target_host(&req) else {
            return Ok(bad_request());
        };

        let request = MockRequest::new(req.method().clone(), req.uri().path())
            .with_headers(req.headers().clone());

        if let Some(mock) = self.engine.respond(&self.catalog, &host, &request) {
            info!(host = %host, status = mock.status.as_u16(), "serving mock response");
            return Ok(mock.into_response());
        }

        debug!(host = %host, "relaying to origin");
        self.relay(req, &host).await
    }

    async fn relay(&self, req: Request<Incoming>, host: &str) -> Result<Response<Body>, Error> {
        let req = relay_request(req, host, self.relay_scheme)?;

        let res = self
            .client
            .request(normalize_request(req))
            .instrument(info_span!("relay_request"))
            .await?;

        Ok(res.map(Body::from))
    }
}

fn splice<B>(req: Request<B>, mut server: TcpStream, authority: Authority)
where
    B: Send + 'static,
{
    let span = info_span!("splice_tunnel", host = %authority);
    let fut = async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let mut upgraded = TokioIo::new(upgraded);
                match tokio::io::copy_bidirectional(&mut upgraded, &mut server).await {
                    Ok((sent, received)) => {
                        debug!(sent, received, "tunnel to {} closed", authority)
                    }
                    Err(e) => error!("Failed to tunnel to {}: {}", authority, e),
                }
            }
            Err(e) => error!("Upgrade error: {}", e),
        }
    };

    spawn_with_trace(fut, span);
}

/// Host a plain proxied request is addressed to: the absolute URI, else the `Host` header.
fn target_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.to_string());
    }

    req.headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
}

fn relay_request<B>(req: Request<B>, host: &str, scheme: RelayScheme) -> Result<Request<Body>, Error>
where
    Body: From<B>,
{
    let (mut parts, body) = req.into_parts();

    let mut uri = parts.uri.into_parts();
    uri.scheme = match scheme {
        RelayScheme::Https => Some(Scheme::HTTPS),
        RelayScheme::Preserve => Some(uri.scheme.unwrap_or(Scheme::HTTP)),
    };
    if uri.authority.is_none() {
        uri.authority = Some(host.parse::<Authority>().map_err(http::Error::from)?);
    }
    if uri.path_and_query.is_none() {
        uri.path_and_query = Some("/".parse().map_err(http::Error::from)?);
    }
    parts.uri = Uri::from_parts(uri).map_err(http::Error::from)?;

    Ok(Request::from_parts(parts, Body::from(body)))
}

#[instrument(skip_all)]
fn normalize_request<T>(mut req: Request<T>) -> Request<T> {
    // Hyper will automatically add a Host header if needed.
    req.headers_mut().remove(HOST);

    // HTTP/2 supports multiple cookie headers, but HTTP/1.x only supports one.
    if let Entry::Occupied(mut cookies) = req.headers_mut().entry(hyper::header::COOKIE) {
        let joined_cookies = bstr::join(b"; ", cookies.iter());
        if let Ok(joined) = joined_cookies.try_into() {
            cookies.insert(joined);
        }
    }

    *req.version_mut() = hyper::Version::HTTP_11;
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};

    fn build_proxy() -> InternalProxy<HttpConnector> {
        InternalProxy {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            catalog: Arc::new(MockCatalog::default()),
            engine: MockEngine::default(),
            tunnel: TunnelSettings::default(),
            relay_scheme: RelayScheme::Preserve,
            client_addr: "127.0.0.1:8080".parse().unwrap(),
        }
    }

    mod bad_request {
        use super::*;

        #[test]
        fn correct_status() {
            let res = bad_request();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
    }

    mod normalize_request {
        use super::*;

        #[test]
        fn removes_host_header() {
            let req = Request::builder()
                .uri("http://example.com/")
                .header(HOST, "example.com")
                .body(())
                .unwrap();

            let req = normalize_request(req);

            assert_eq!(req.headers().get(HOST), None);
        }

        #[test]
        fn joins_cookies() {
            let req = Request::builder()
                .uri("http://example.com/")
                .header(hyper::header::COOKIE, "foo=bar")
                .header(hyper::header::COOKIE, "baz=qux")
                .body(())
                .unwrap();

            let req = normalize_request(req);

            assert_eq!(
                req.headers().get_all(hyper::header::COOKIE).iter().count(),
                1
            );

            assert_eq!(
                req.headers().get(hyper::header::COOKIE),
                Some(&"foo=bar; baz=qux".parse().unwrap())
            );
        }
    }

    mod target_host {
        use super::*;

        #[test]
        fn prefers_absolute_uri() {
            let req = Request::builder()
                .uri("http://s3.amazonaws.com:8080/b/k")
                .header(HOST, "other.example.com")
                .body(())
                .unwrap();

            assert_eq!(target_host(&req).as_deref(), Some("s3.amazonaws.com:8080"));
        }

        #[test]
        fn falls_back_to_host_header() {
            let req = Request::builder()
                .uri("/b/k")
                .header(HOST, "s3.amazonaws.com")
                .body(())
                .unwrap();

            assert_eq!(target_host(&req).as_deref(), Some("s3.amazonaws.com"));
        }

        #[test]
        fn missing_host() {
            let req = Request::builder().uri("/b/k").body(()).unwrap();
            assert_eq!(target_host(&req), None);
        }
    }

    mod relay_request {
        use super::*;

        fn request(uri: &str) -> Request<Body> {
            Request::builder().uri(uri).body(Body::empty()).unwrap()
        }

        #[test]
        fn upgrades_scheme_to_https() {
            let req = relay_request(
                request("http://example.com/path?q=1"),
                "example.com",
                RelayScheme::Https,
            )
            .unwrap();

            assert_eq!(req.uri(), "https://example.com/path?q=1");
        }

        #[test]
        fn preserves_scheme() {
            let req = relay_request(
                request("http://127.0.0.1:9000/hello"),
                "127.0.0.1:9000",
                RelayScheme::Preserve,
            )
            .unwrap();

            assert_eq!(req.uri(), "http://127.0.0.1:9000/hello");
        }

        #[test]
        fn fills_authority_from_host() {
            let req = relay_request(request("/hello"), "example.com", RelayScheme::Preserve)
                .unwrap();

            assert_eq!(req.uri(), "http://example.com/hello");
        }
    }

    mod process_connect {
        use super::*;

        #[tokio::test]
        async fn returns_bad_request_if_missing_authority() {
            let proxy = build_proxy();

            let req = Request::builder()
                .method(Method::CONNECT)
                .uri("/foo/bar?baz")
                .body(())
                .unwrap();

            let res = proxy.process_connect(req).await.unwrap();

            assert_eq!(res.status(), StatusCode::BAD_REQUEST)
        }

        #[tokio::test]
        async fn acknowledges_recognized_host_without_connecting() {
            let proxy = build_proxy();

            let req = Request::builder()
                .method(Method::CONNECT)
                .uri("s3.amazonaws.com:443")
                .body(())
                .unwrap();

            let res = proxy.process_connect(req).await.unwrap();

            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(
                res.extensions()
                    .get::<ReasonPhrase>()
                    .map(|reason| reason.as_bytes()),
                Some(&b"Connection Established"[..])
            );
        }

        #[tokio::test]
        async fn fails_when_origin_is_unreachable() {
            let proxy = build_proxy();

            let req = Request::builder()
                .method(Method::CONNECT)
                .uri("127.0.0.1:1")
                .body(())
                .unwrap();

            assert!(matches!(
                proxy.process_connect(req).await,
                Err(Error::Io(_))
            ));
        }
    }

    mod synthesize {
        use super::*;

        #[test]
        fn unconfigured_service_is_not_found() {
            let proxy = build_proxy();
            let line = RequestLine {
                method: Method::GET,
                path: "/b/k".to_owned(),
            };

            let response = proxy.synthesize("s3.amazonaws.com", &line);

            assert_eq!(response.status, StatusCode::NOT_FOUND);
        }
    }
}
