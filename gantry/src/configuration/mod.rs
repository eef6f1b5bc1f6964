//! Logic for loading configuration in to an object model

mod server;

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use self::server::Server;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not parse configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of the server.
///
/// Can be created through `serde::Deserialize` from YAML with [`Configuration::from_str`],
/// or inline in Rust code with [`Configuration::builder`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Configuration options pertaining to the http server component.
    pub(crate) server: Server,

    /// Automatic persisted queries.
    pub(crate) persisted_queries: PersistedQueries,

    /// Batched requests.
    pub(crate) batching: Batching,

    /// Masking of unexpected errors.
    pub(crate) masked_errors: MaskedErrors,

    /// Cache of parsed and validated documents.
    pub(crate) parser_cache: ParserCache,

    /// Streamed responses.
    pub(crate) subscriptions: Subscriptions,

    /// Allow-lists of request and response headers.
    pub(crate) headers: Headers,

    /// Additional top level keys accepted in request parameters.
    pub(crate) extra_params: Vec<String>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)] // Used through a builder, not directly
    fn new(
        server: Option<Server>,
        persisted_queries: Option<PersistedQueries>,
        batching: Option<Batching>,
        masked_errors: Option<MaskedErrors>,
        parser_cache: Option<ParserCache>,
        subscriptions: Option<Subscriptions>,
        headers: Option<Headers>,
        extra_params: Vec<String>,
    ) -> Self {
        Self {
            server: server.unwrap_or_default(),
            persisted_queries: persisted_queries.unwrap_or_default(),
            batching: batching.unwrap_or_default(),
            masked_errors: masked_errors.unwrap_or_default(),
            parser_cache: parser_cache.unwrap_or_default(),
            subscriptions: subscriptions.unwrap_or_default(),
            headers: headers.unwrap_or_default(),
            extra_params,
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub(crate) fn validate(self) -> Result<Self, ConfigurationError> {
        if !self.server.graphql_path.starts_with('/') {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid 'server.graphql_path' configuration",
                error: format!(
                    "'{}' is invalid, it must be an absolute path and start with '/'",
                    self.server.graphql_path
                ),
            });
        }
        if self.batching.maximum_size == Some(0) {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid 'batching.maximum_size' configuration",
                error: "it must be greater than 0".to_string(),
            });
        }
        Ok(self)
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let configuration: Configuration = if s.trim().is_empty() {
            Configuration::default()
        } else {
            serde_yaml::from_str(s).map_err(ConfigurationError::DeserializeConfigError)?
        };
        configuration.validate()
    }
}

/// Automatic persisted queries configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct PersistedQueries {
    /// Activates automatic persisted queries (enabled by default)
    pub(crate) enabled: bool,

    /// The in memory store of persisted queries.
    pub(crate) cache: InMemoryCache,
}

impl Default for PersistedQueries {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: InMemoryCache::default(),
        }
    }
}

#[buildstructor::buildstructor]
impl PersistedQueries {
    #[builder(visibility = "pub")]
    fn new(enabled: Option<bool>, cache: Option<InMemoryCache>) -> Self {
        Self {
            enabled: enabled.unwrap_or(true),
            cache: cache.unwrap_or_default(),
        }
    }
}

/// In memory LRU cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct InMemoryCache {
    /// Number of entries in the LRU cache
    pub(crate) capacity: NonZeroUsize,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PERSISTED_QUERY_CAPACITY,
        }
    }
}

impl InMemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }
}

const DEFAULT_PERSISTED_QUERY_CAPACITY: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

const DEFAULT_PARSER_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Batched requests configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Batching {
    /// Accept arrays of operations, and arrays of variables (disabled by default)
    pub(crate) enabled: bool,

    /// Maximum number of operations in a single batch
    pub(crate) maximum_size: Option<usize>,
}

#[buildstructor::buildstructor]
impl Batching {
    #[builder(visibility = "pub")]
    fn new(enabled: Option<bool>, maximum_size: Option<usize>) -> Self {
        Self {
            enabled: enabled.unwrap_or_default(),
            maximum_size,
        }
    }
}

/// Masking of errors which did not start out as GraphQL errors.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct MaskedErrors {
    /// Replace unexpected errors with a generic one (enabled by default)
    pub(crate) enabled: bool,

    /// The message of masked errors
    pub(crate) message: String,

    /// Attach the original error under `extensions.originalError`
    pub(crate) dev: bool,
}

const DEFAULT_MASKED_MESSAGE: &str = "Unexpected error.";

impl Default for MaskedErrors {
    fn default() -> Self {
        Self {
            enabled: true,
            message: DEFAULT_MASKED_MESSAGE.to_string(),
            dev: false,
        }
    }
}

#[buildstructor::buildstructor]
impl MaskedErrors {
    #[builder(visibility = "pub")]
    fn new(enabled: Option<bool>, message: Option<String>, dev: Option<bool>) -> Self {
        Self {
            enabled: enabled.unwrap_or(true),
            message: message.unwrap_or_else(|| DEFAULT_MASKED_MESSAGE.to_string()),
            dev: dev.unwrap_or_default(),
        }
    }
}

/// Cache of parsed and validated documents.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct ParserCache {
    /// Reuse parsing and validation results of identical queries (enabled by default)
    pub(crate) enabled: bool,

    /// Number of documents kept in the cache
    pub(crate) capacity: NonZeroUsize,
}

impl Default for ParserCache {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_PARSER_CACHE_CAPACITY,
        }
    }
}

#[buildstructor::buildstructor]
impl ParserCache {
    #[builder(visibility = "pub")]
    fn new(enabled: Option<bool>, capacity: Option<NonZeroUsize>) -> Self {
        Self {
            enabled: enabled.unwrap_or(true),
            capacity: capacity.unwrap_or(DEFAULT_PARSER_CACHE_CAPACITY),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(12)
}

/// Streamed responses configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Subscriptions {
    /// Interval between keep-alive comments of event streams, in human-readable format;
    /// defaults to 12s, `0s` disables them
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String", default = "default_heartbeat_interval")]
    pub(crate) heartbeat_interval: Duration,
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

#[buildstructor::buildstructor]
impl Subscriptions {
    #[builder(visibility = "pub")]
    fn new(heartbeat_interval: Option<Duration>) -> Self {
        Self {
            heartbeat_interval: heartbeat_interval.unwrap_or_else(default_heartbeat_interval),
        }
    }

    /// `None` when keep-alive comments are disabled.
    pub(crate) fn heartbeat(&self) -> Option<Duration> {
        (!self.heartbeat_interval.is_zero()).then_some(self.heartbeat_interval)
    }
}

/// Allow-lists of headers. When a list is set, headers missing from it are removed.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Headers {
    /// Request headers visible to the GraphQL pipeline
    pub(crate) allowed_request: Option<Vec<String>>,

    /// Response headers sent to the client
    pub(crate) allowed_response: Option<Vec<String>>,
}

#[buildstructor::buildstructor]
impl Headers {
    #[builder(visibility = "pub")]
    fn new(allowed_request: Option<Vec<String>>, allowed_response: Option<Vec<String>>) -> Self {
        Self {
            allowed_request,
            allowed_response,
        }
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings.into_generator().into_root_schema_for::<Configuration>()
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_configuration_uses_defaults() {
        let configuration = Configuration::from_str("").unwrap();
        assert_eq!(configuration.server.graphql_path, "/graphql");
        assert_eq!(configuration.server.listen.to_string(), "127.0.0.1:4000");
        assert!(configuration.persisted_queries.enabled);
        assert_eq!(configuration.persisted_queries.cache.capacity.get(), 512);
        assert!(!configuration.batching.enabled);
        assert!(configuration.masked_errors.enabled);
        assert_eq!(configuration.masked_errors.message, "Unexpected error.");
        assert_eq!(configuration.parser_cache.capacity.get(), 1024);
        assert_eq!(
            configuration.subscriptions.heartbeat(),
            Some(Duration::from_secs(12))
        );
    }

    #[test]
    fn yaml_configuration() {
        let configuration = Configuration::from_str(
            r#"
server:
  listen: 0.0.0.0:8080
  graphql_path: /api
batching:
  enabled: true
  maximum_size: 10
masked_errors:
  message: Something went wrong
  dev: true
subscriptions:
  heartbeat_interval: 0s
extra_params:
  - doc_id
"#,
        )
        .unwrap();
        assert_eq!(configuration.server.graphql_path, "/api");
        assert_eq!(configuration.batching.maximum_size, Some(10));
        assert_eq!(configuration.masked_errors.message, "Something went wrong");
        assert!(configuration.masked_errors.enabled);
        assert_eq!(configuration.subscriptions.heartbeat(), None);
        assert_eq!(configuration.extra_params, vec!["doc_id".to_string()]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = Configuration::from_str("masked_errors:\n  enabled: true\n  unknown: 1\n")
            .unwrap_err();
        assert!(error.to_string().contains("unknown"));
    }

    #[test]
    fn relative_graphql_path_is_rejected() {
        let error = Configuration::from_str("server:\n  graphql_path: graphql\n").unwrap_err();
        assert!(matches!(
            error,
            ConfigurationError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn builder_matches_defaults() {
        let built = Configuration::builder().build();
        let parsed = Configuration::from_str("").unwrap();
        assert_eq!(
            serde_json::to_value(&built).unwrap(),
            serde_json::to_value(&parsed).unwrap()
        );
    }

    #[test]
    fn schema_lists_sections() {
        let schema = serde_json::to_value(generate_config_schema()).unwrap();
        let mut sections: Vec<_> = schema["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        sections.sort();
        assert_json_snapshot!(sections, @r###"
        [
          "batching",
          "extra_params",
          "headers",
          "masked_errors",
          "parser_cache",
          "persisted_queries",
          "server",
          "subscriptions"
        ]
        "###);
    }
}
