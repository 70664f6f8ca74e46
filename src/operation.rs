//! Coarse operation names used to pick a response branch.
//!
//! This is not a decoder for AWS requests. The operation comes from the `X-Amz-Target` header
//! when present, otherwise from the method and the first path segment, so a real SDK call can
//! map to a different branch than the AWS API would choose.

use hyper::{HeaderMap, Method};

pub const AMZ_TARGET: &str = "x-amz-target";

/// Derive the operation token for a request.
///
/// `X-Amz-Target: DynamoDB_20120810.GetItem` yields `GetItem`; without the header, `GET /b/k`
/// yields `GET_b`.
pub fn extract_operation(method: &Method, path: &str, headers: &HeaderMap) -> String {
    if let Some(target) = headers.get(AMZ_TARGET).and_then(|value| value.to_str().ok()) {
        if let Some(operation) = target.rsplit('.').next() {
            return operation.to_owned();
        }
    }

    let path = path.split('?').next().unwrap_or_default();
    let segment = path.trim_start_matches('/').split('/').next().unwrap_or_default();

    format!("{}_{}", method, segment)
}
