use super::{GeneratorDefaults, MockResponse};
use crate::catalog::{DynamoDbConfig, Table};
use hyper::{StatusCode, header::HeaderValue};
use serde_json::{Value, json};

const AMZ_JSON: &str = "application/x-amz-json-1.0";

fn amz_json(status: StatusCode, value: &Value) -> MockResponse {
    MockResponse::with_body(status, HeaderValue::from_static(AMZ_JSON), value.to_string())
}

/// The table `GetItem` reads from. The request's own `TableName` is not consulted.
fn resolve_table<'a>(config: &'a DynamoDbConfig, defaults: &GeneratorDefaults) -> Option<&'a Table> {
    match config.default_table.as_ref().or(defaults.table.as_ref()) {
        Some(name) => config.tables.get(name),
        None => config.tables.values().next(),
    }
}

pub(super) fn generate(
    config: &DynamoDbConfig,
    operation: &str,
    defaults: &GeneratorDefaults,
) -> MockResponse {
    if operation.contains("GetItem") {
        let item = resolve_table(config, defaults).and_then(|table| table.items.first());

        return match item {
            Some(item) => amz_json(StatusCode::OK, &json!({ "Item": item })),
            None => amz_json(StatusCode::OK, &json!({})),
        };
    }

    if operation.contains("PutItem") {
        return amz_json(StatusCode::OK, &json!({}));
    }

    MockResponse::error(
        StatusCode::BAD_REQUEST,
        "UnsupportedOperation",
        format!("unsupported DynamoDB operation `{}`", operation),
    )
}
