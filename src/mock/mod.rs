//! Synthesized responses.
//!
//! Each generated service has its own strategy module. Strategies are plain functions of the
//! catalog entry and the request; none of them mutate the catalog or perform I/O.

mod dynamodb;
mod lambda;
mod s3;

use crate::{
    Body,
    catalog::{MockCatalog, ServiceConfig, ServiceKey},
    classify::classify,
    operation::extract_operation,
};
use hyper::{
    HeaderMap, Method, Response, StatusCode,
    body::Bytes,
    header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue},
};
use serde_json::{Value, json};
use std::io::Write as _;
use tracing::debug;

pub const APPLICATION_JSON: &str = "application/json";

/// The parts of a request that response generation looks at.
#[derive(Clone, Debug, Default)]
pub struct MockRequest {
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    pub headers: HeaderMap,
}

impl MockRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if let Some(query) = path.find('?') {
            path.truncate(query);
        }

        Self {
            method,
            path,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// A response produced without contacting any origin.
#[derive(Clone, Debug, PartialEq)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MockResponse {
    /// A response with no body and no headers.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A response with a body of the given content type.
    pub fn with_body(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, content_type);

        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A JSON response.
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::with_body(
            status,
            HeaderValue::from_static(APPLICATION_JSON),
            value.to_string(),
        )
    }

    /// A JSON error response of the form `{"error": code, "message": message}`.
    pub fn error(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self::json(status, &json!({ "error": code, "message": message.into() }))
    }

    /// Content type of the body, `application/json` when none was set.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(APPLICATION_JSON)
    }

    /// Render the raw HTTP/1.1 text written onto intercepted tunnels.
    ///
    /// `Content-Type` comes first and `Content-Length` is always the byte length of the body.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(128 + self.body.len());
        let _ = write!(
            raw,
            "HTTP/1.1 {} {}\r\nContent-Type: ",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown"),
        );
        match self.headers.get(CONTENT_TYPE) {
            Some(value) => raw.extend_from_slice(value.as_bytes()),
            None => raw.extend_from_slice(APPLICATION_JSON.as_bytes()),
        }
        raw.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            if name == CONTENT_TYPE || name == CONTENT_LENGTH {
                continue;
            }
            // Values go out as raw bytes; obs-text is legal on the wire.
            raw.extend_from_slice(name.as_str().as_bytes());
            raw.extend_from_slice(b": ");
            raw.extend_from_slice(value.as_bytes());
            raw.extend_from_slice(b"\r\n");
        }

        let _ = write!(
            raw,
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        );

        raw.extend_from_slice(&self.body);
        raw
    }

    pub fn into_response(self) -> Response<Body> {
        let mut res = Response::new(Body::from(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

/// Names the generators would otherwise have to hardcode.
///
/// Values set in the catalog (`defaultTable`, `defaultFunction`) take precedence.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GeneratorDefaults {
    pub table: Option<String>,
    pub function: Option<String>,
}

/// Produce a response for a service that has a catalog entry.
///
/// `service` is `None` when the host was recognized but did not name a known service.
pub fn generate(
    service: Option<ServiceKey>,
    operation: &str,
    config: Option<&ServiceConfig>,
    request: &MockRequest,
    defaults: &GeneratorDefaults,
) -> MockResponse {
    match (service, config) {
        (Some(ServiceKey::S3), Some(ServiceConfig::S3(config))) => s3::generate(config, request),
        (Some(ServiceKey::DynamoDb), Some(ServiceConfig::DynamoDb(config))) => {
            dynamodb::generate(config, operation, defaults)
        }
        (Some(ServiceKey::Lambda), Some(ServiceConfig::Lambda(config))) => {
            lambda::generate(config, operation, defaults)
        }
        (Some(service), _) => MockResponse::error(
            StatusCode::NOT_IMPLEMENTED,
            "NotImplemented",
            format!("mock responses for {} are not implemented", service),
        ),
        (None, _) => MockResponse::error(
            StatusCode::NOT_IMPLEMENTED,
            "NotImplemented",
            "unrecognized service",
        ),
    }
}

/// Classification, operation extraction and generation in one step.
#[derive(Clone, Debug, Default)]
pub struct MockEngine {
    defaults: GeneratorDefaults,
}

impl MockEngine {
    pub fn new(defaults: GeneratorDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &GeneratorDefaults {
        &self.defaults
    }

    /// Answer a request for `host` from `catalog`.
    ///
    /// Returns `None` when no mock applies: the host is not an AWS endpoint, it names no known
    /// service, or it names a service the catalog has no entry for.
    pub fn respond(
        &self,
        catalog: &MockCatalog,
        host: &str,
        request: &MockRequest,
    ) -> Option<MockResponse> {
        let classification = classify(host);
        if !classification.recognized {
            debug!(host, "host not recognized");
            return None;
        }

        let Some(service) = classification.service else {
            debug!(host, "recognized host names no known service");
            return None;
        };

        let Some(config) = catalog.get(service) else {
            debug!(host, %service, "no catalog entry for service");
            return None;
        };

        let operation = extract_operation(&request.method, &request.path, &request.headers);

        let response = generate(
            Some(service),
            &operation,
            Some(config),
            request,
            &self.defaults,
        );

        debug!(
            host,
            operation = %operation,
            status = response.status.as_u16(),
            "generated mock response"
        );

        Some(response)
    }
}
