//! Hostname classification.
//!
//! Recognition and service identification are two independent passes over the hostname: a host
//! can be recognized as an AWS endpoint without naming any service we know about.

use crate::catalog::ServiceKey;

const HOST_SUFFIXES: &[&str] = &[".amazonaws.com", ".amazonaws.com.cn", ".aws"];

const HOST_PREFIXES: &[&str] = &["s3.", "dynamodb.", "lambda.", "sqs.", "sns."];

// Scanned in order; the first token found wins.
const SERVICE_TOKENS: &[(&str, ServiceKey)] = &[
    ("s3", ServiceKey::S3),
    ("dynamodb", ServiceKey::DynamoDb),
    ("lambda", ServiceKey::Lambda),
    ("sqs", ServiceKey::Sqs),
    ("sns", ServiceKey::Sns),
];

/// Result of classifying a hostname.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Classification {
    /// Whether the host looks like an AWS endpoint.
    pub recognized: bool,
    /// The service named by the host, if any.
    pub service: Option<ServiceKey>,
}

/// Classify a hostname, with or without a trailing `:port`.
pub fn classify(host: &str) -> Classification {
    let host = strip_port(host).to_ascii_lowercase();

    let recognized = HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
        || HOST_PREFIXES.iter().any(|prefix| host.starts_with(prefix));

    let service = SERVICE_TOKENS
        .iter()
        .find(|(token, _)| host.contains(token))
        .map(|(_, service)| *service);

    Classification {
        recognized,
        service,
    }
}

/// Remove a trailing `:port` from a host. Bracketed IPv6 literals keep their brackets.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
