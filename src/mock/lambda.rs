use super::{GeneratorDefaults, MockResponse};
use crate::catalog::{LambdaConfig, LambdaFunction};
use hyper::StatusCode;

/// The function `Invoke` answers for. The request's own function name is not consulted.
fn resolve_function<'a>(
    config: &'a LambdaConfig,
    defaults: &GeneratorDefaults,
) -> Option<(&'a str, &'a LambdaFunction)> {
    match config.default_function.as_ref().or(defaults.function.as_ref()) {
        Some(name) => config
            .functions
            .get_key_value(name)
            .map(|(name, function)| (name.as_str(), function)),
        None => config
            .functions
            .iter()
            .next()
            .map(|(name, function)| (name.as_str(), function)),
    }
}

pub(super) fn generate(
    config: &LambdaConfig,
    operation: &str,
    defaults: &GeneratorDefaults,
) -> MockResponse {
    if !operation.contains("Invoke") {
        return MockResponse::error(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            format!("no mock for Lambda operation `{}`", operation),
        );
    }

    match resolve_function(config, defaults) {
        Some((_, LambdaFunction {
            response: Some(payload),
        })) => MockResponse::json(StatusCode::OK, payload),
        Some((name, _)) => MockResponse::error(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            format!("function `{}` has no mock response", name),
        ),
        None => MockResponse::error(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            "no mock function configured",
        ),
    }
}
