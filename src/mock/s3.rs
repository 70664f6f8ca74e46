use super::{MockRequest, MockResponse};
use crate::catalog::S3Config;
use hyper::{
    Method, StatusCode,
    body::Bytes,
    header::{ETAG, HeaderName, HeaderValue, LAST_MODIFIED},
};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use time::{OffsetDateTime, macros::format_description};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

static ETAG_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Path-style addressing: `/bucket/key/with/slashes`.
fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    path.split_once('/').unwrap_or((path, ""))
}

// Time-derived rather than content-derived: two GETs of the same object get different tags.
fn fresh_etag() -> HeaderValue {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let sequence = ETAG_SEQUENCE.fetch_add(1, Ordering::Relaxed);

    HeaderValue::try_from(format!("\"{:x}{:04x}\"", nanos, sequence & 0xffff))
        .unwrap_or_else(|_| HeaderValue::from_static("\"0\""))
}

fn http_date(at: OffsetDateTime) -> Option<HeaderValue> {
    let formatted = at
        .format(format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ))
        .ok()?;

    HeaderValue::try_from(formatted).ok()
}

pub(super) fn generate(config: &S3Config, request: &MockRequest) -> MockResponse {
    let (bucket, key) = split_path(&request.path);

    if bucket.is_empty() || key.is_empty() {
        return not_found(bucket, key);
    }

    match request.method {
        Method::GET => {
            let Some(object) = config
                .buckets
                .get(bucket)
                .and_then(|bucket| bucket.objects.get(key))
            else {
                return not_found(bucket, key);
            };

            let content_type = object
                .metadata
                .content_type
                .as_deref()
                .and_then(|value| HeaderValue::try_from(value).ok())
                .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

            let mut response =
                MockResponse::with_body(StatusCode::OK, content_type, object.content.clone());
            response.headers.insert(ETAG, fresh_etag());
            if let Some(date) = http_date(OffsetDateTime::now_utc()) {
                response.headers.insert(LAST_MODIFIED, date);
            }

            for (name, value) in &object.metadata.extra {
                let Some(value) = value.as_str() else {
                    continue;
                };
                let name = format!("x-amz-meta-{}", name.to_ascii_lowercase());
                if let (Ok(name), Ok(value)) =
                    (HeaderName::try_from(name), HeaderValue::try_from(value))
                {
                    response.headers.insert(name, value);
                }
            }

            response
        }
        // Acknowledged but not stored; a later GET still sees the catalog.
        Method::PUT => {
            let mut response = MockResponse::with_body(
                StatusCode::OK,
                HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
                Bytes::new(),
            );
            response.headers.insert(ETAG, fresh_etag());
            response
        }
        _ => not_found(bucket, key),
    }
}

fn not_found(bucket: &str, key: &str) -> MockResponse {
    MockResponse::error(
        StatusCode::NOT_FOUND,
        "NoSuchKey",
        format!("no mock object for bucket `{}` and key `{}`", bucket, key),
    )
}
