//! The mock catalog: everything the proxy knows how to answer, keyed by service.
//!
//! A catalog is parsed and validated once, when it is loaded. Serving code only ever sees a
//! validated [`MockCatalog`] behind an `Arc`, so response generators never re-check shape.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};
use thiserror::Error;

/// Errors raised while loading a catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported service `{0}`")]
    UnsupportedService(String),
    #[error("invalid configuration for service `{service}`: {source}")]
    InvalidService {
        service: ServiceKey,
        source: serde_json::Error,
    },
    #[error("object `{key}` in bucket `{bucket}` has no content")]
    EmptyContent { bucket: String, key: String },
}

/// Service identifiers accepted in a catalog.
///
/// Only S3, DynamoDB and Lambda have response generators. The others are accepted so that a
/// catalog written for a wider tool still loads.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ServiceKey {
    S3,
    DynamoDb,
    Lambda,
    Sqs,
    Sns,
    ApiGateway,
    CloudWatch,
    EventBridge,
    Kinesis,
    SecretsManager,
    Ssm,
    StepFunctions,
}

impl ServiceKey {
    pub const ALL: [ServiceKey; 12] = [
        ServiceKey::S3,
        ServiceKey::DynamoDb,
        ServiceKey::Lambda,
        ServiceKey::Sqs,
        ServiceKey::Sns,
        ServiceKey::ApiGateway,
        ServiceKey::CloudWatch,
        ServiceKey::EventBridge,
        ServiceKey::Kinesis,
        ServiceKey::SecretsManager,
        ServiceKey::Ssm,
        ServiceKey::StepFunctions,
    ];

    /// The key as it appears in a catalog file.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKey::S3 => "s3",
            ServiceKey::DynamoDb => "dynamodb",
            ServiceKey::Lambda => "lambda",
            ServiceKey::Sqs => "sqs",
            ServiceKey::Sns => "sns",
            ServiceKey::ApiGateway => "apigateway",
            ServiceKey::CloudWatch => "cloudwatch",
            ServiceKey::EventBridge => "eventbridge",
            ServiceKey::Kinesis => "kinesis",
            ServiceKey::SecretsManager => "secretsmanager",
            ServiceKey::Ssm => "ssm",
            ServiceKey::StepFunctions => "stepfunctions",
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| CatalogError::UnsupportedService(s.to_owned()))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct S3Config {
    #[serde(default)]
    pub buckets: BTreeMap<String, Bucket>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Bucket {
    #[serde(default)]
    pub objects: BTreeMap<String, S3Object>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct S3Object {
    pub content: String,
    #[serde(default)]
    pub metadata: ObjectMetadata,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ObjectMetadata {
    #[serde(rename = "ContentType")]
    pub content_type: Option<String>,
    /// Any other metadata fields, surfaced as `x-amz-meta-*` headers when they are strings.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamoDbConfig {
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
    /// Table answered by `GetItem`. Falls back to the first table by name.
    pub default_table: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(default)]
    pub items: Vec<Map<String, Value>>,
    #[serde(default)]
    pub key_schema: Vec<Value>,
    #[serde(default)]
    pub attribute_definitions: Vec<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LambdaConfig {
    #[serde(default)]
    pub functions: BTreeMap<String, LambdaFunction>,
    /// Function answered by `Invoke`. Falls back to the first function by name.
    pub default_function: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LambdaFunction {
    pub response: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SqsConfig {
    #[serde(default)]
    pub queues: BTreeMap<String, Vec<Value>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SnsConfig {
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<Value>>,
}

/// Validated configuration of a single service.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceConfig {
    S3(S3Config),
    DynamoDb(DynamoDbConfig),
    Lambda(LambdaConfig),
    Sqs(SqsConfig),
    Sns(SnsConfig),
    /// An accepted identifier without a typed shape or a generator.
    Other(Value),
}

impl ServiceConfig {
    fn parse(service: ServiceKey, value: Value) -> Result<Self, CatalogError> {
        let invalid = |source| CatalogError::InvalidService { service, source };

        let config = match service {
            ServiceKey::S3 => {
                let config: S3Config = serde_json::from_value(value).map_err(invalid)?;
                validate_s3(&config)?;
                ServiceConfig::S3(config)
            }
            ServiceKey::DynamoDb => {
                ServiceConfig::DynamoDb(serde_json::from_value(value).map_err(invalid)?)
            }
            ServiceKey::Lambda => {
                ServiceConfig::Lambda(serde_json::from_value(value).map_err(invalid)?)
            }
            ServiceKey::Sqs => ServiceConfig::Sqs(serde_json::from_value(value).map_err(invalid)?),
            ServiceKey::Sns => ServiceConfig::Sns(serde_json::from_value(value).map_err(invalid)?),
            _ => ServiceConfig::Other(value),
        };

        Ok(config)
    }
}

fn validate_s3(config: &S3Config) -> Result<(), CatalogError> {
    for (bucket_name, bucket) in &config.buckets {
        for (key, object) in &bucket.objects {
            if object.content.is_empty() {
                return Err(CatalogError::EmptyContent {
                    bucket: bucket_name.clone(),
                    key: key.clone(),
                });
            }
        }
    }

    Ok(())
}

#[derive(Deserialize)]
struct RawCatalog {
    #[serde(default)]
    version: String,
    #[serde(default)]
    services: Map<String, Value>,
}

/// All configured mocks, keyed by service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MockCatalog {
    version: String,
    services: BTreeMap<ServiceKey, ServiceConfig>,
}

impl MockCatalog {
    /// Load and validate a catalog from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse and validate a catalog from JSON text.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Validate a catalog from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_value(value)?;
        let mut services = BTreeMap::new();

        for (name, config) in raw.services {
            let service = name.parse::<ServiceKey>()?;
            services.insert(service, ServiceConfig::parse(service, config)?);
        }

        Ok(Self {
            version: raw.version,
            services,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, service: ServiceKey) -> Option<&ServiceConfig> {
        self.services.get(&service)
    }

    pub fn services(&self) -> impl Iterator<Item = (ServiceKey, &ServiceConfig)> {
        self.services.iter().map(|(key, config)| (*key, config))
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
