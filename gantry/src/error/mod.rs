//! Request errors.
//!
//! [`RequestError`] covers every failure the pipeline raises on its own, before or around
//! execution. Failures coming from collaborators (resolvers, context factories, plugins,
//! persisted query stores) travel as [`tower::BoxError`] and go through [`classify`].

pub(crate) mod classify;

use displaydoc::Display;
use indexmap::IndexMap;
use thiserror::Error;

pub use self::classify::classify;
pub use self::classify::mask_error;
pub use self::classify::normalize_error;
pub use self::classify::Aborted;
pub use self::classify::AggregateError;
use crate::graphql;
use crate::graphql::HttpExtension;
use crate::graphql::IntoGraphQLErrors;

const ALLOW_GET_POST: &str = "GET, POST";

/// Error types for the request pipeline.
///
/// They are not returned to the client as is, but converted to a [`graphql::Error`] carrying
/// an `http` extension with the status (and sometimes headers) they stand for.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// Expected params to be an object but given {0}.
    ParamsNotAnObject(&'static str),

    /// Invalid "params" in the request body
    InvalidParams,

    /// Unexpected parameter "{0}" in the request body.
    UnexpectedParameter(String),

    /// Must provide query string.
    MissingQuery,

    /// Expected "query" param to be a string, but given {0}.
    InvalidQueryParam(&'static str),

    /// Expected "variables" param to be empty or an object, but given {0}.
    InvalidVariablesParam(&'static str),

    /// Expected "extensions" param to be empty or an object, but given {0}.
    InvalidExtensionsParam(&'static str),

    /// POST body sent invalid JSON.
    MalformedBody,

    /// {0} are invalid JSON.
    MalformedQueryString(&'static str),

    /// Request is not valid
    UnsupportedMediaType,

    /// GraphQL only supports GET and POST requests.
    MethodNotAllowed,

    /// Can only perform a mutation operation from a POST request.
    MutationOverGet,

    /// Batching is not supported.
    BatchingNotSupported,

    /// Batching is limited to {0} operations per request.
    BatchLimitExceeded(usize),

    /// PersistedQueryKeyNotFound
    PersistedQueryKeyNotFound,

    /// PersistedQueryNotFound
    PersistedQueryNotFound,

    /// PersistedQueryInvalidHash
    PersistedQueryInvalidHash,

    /// PersistedQueryNotSupported
    PersistedQueryNotSupported,

    /// Operation name "{0}" doesn't match the name defined in the query.
    OperationNameMismatch(String),

    /// Could not determine what operation to execute. There is no operation "{0}" in the query.
    UnknownOperation(String),

    /// Could not determine what operation to execute. The query contains multiple operations, an operation name must be provided
    AmbiguousOperation,
}

impl RequestError {
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            RequestError::MethodNotAllowed | RequestError::MutationOverGet => {
                http::StatusCode::METHOD_NOT_ALLOWED
            }
            RequestError::BatchLimitExceeded(_) => http::StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::PersistedQueryNotFound => http::StatusCode::NOT_FOUND,
            RequestError::PersistedQueryNotSupported => http::StatusCode::INTERNAL_SERVER_ERROR,
            _ => http::StatusCode::BAD_REQUEST,
        }
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            RequestError::MethodNotAllowed | RequestError::MutationOverGet => "METHOD_NOT_ALLOWED",
            RequestError::BatchingNotSupported | RequestError::BatchLimitExceeded(_) => {
                "BATCH_REJECTED"
            }
            RequestError::PersistedQueryKeyNotFound => "PERSISTED_QUERY_ID_REQUIRED",
            RequestError::PersistedQueryNotFound => "PERSISTED_QUERY_NOT_FOUND",
            RequestError::PersistedQueryInvalidHash => "PERSISTED_QUERY_HASH_MISMATCH",
            RequestError::PersistedQueryNotSupported => "PERSISTED_QUERY_NOT_SUPPORTED",
            RequestError::OperationNameMismatch(_)
            | RequestError::UnknownOperation(_)
            | RequestError::AmbiguousOperation => "OPERATION_RESOLUTION_FAILURE",
            _ => "BAD_REQUEST",
        }
    }

    /// The value of the `Allow` header sent along with this error, if any.
    fn allow(&self) -> Option<&'static str> {
        match self {
            RequestError::MutationOverGet => Some("POST"),
            RequestError::MethodNotAllowed
            | RequestError::ParamsNotAnObject(_)
            | RequestError::MissingQuery
            | RequestError::InvalidQueryParam(_)
            | RequestError::InvalidVariablesParam(_)
            | RequestError::InvalidExtensionsParam(_) => Some(ALLOW_GET_POST),
            _ => None,
        }
    }

    /// Errors mandated by the GraphQL over HTTP specification.
    fn is_spec(&self) -> bool {
        matches!(
            self,
            RequestError::InvalidParams | RequestError::MissingQuery | RequestError::MalformedBody
        )
    }

    /// Convert the request error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        let mut headers = IndexMap::new();
        if let Some(allow) = self.allow() {
            headers.insert(http::header::ALLOW.to_string(), allow.to_string());
        }
        let mut error = graphql::Error::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .build();
        HttpExtension {
            status: Some(self.status_code().as_u16()),
            headers,
            spec: self.is_spec().then_some(true),
        }
        .merge_into(&mut error.extensions);
        error
    }
}

/// The phase a document error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPhase {
    Parse,
    Validation,
}

impl DocumentPhase {
    fn extension_code(self) -> &'static str {
        match self {
            DocumentPhase::Parse => "GRAPHQL_PARSE_FAILED",
            DocumentPhase::Validation => "GRAPHQL_VALIDATION_FAILED",
        }
    }
}

/// Errors found in a GraphQL document while parsing or validating it.
///
/// Every error is tagged with the code of its phase and an `http` extension asking for a
/// `400`, flagged as mandated by the GraphQL over HTTP specification. Values already present
/// on an error are kept.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct DocumentErrors {
    pub phase: DocumentPhase,
    pub errors: Vec<graphql::Error>,
}

impl std::fmt::Display for DocumentErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            DocumentPhase::Parse => "parsing",
            DocumentPhase::Validation => "validation",
        };
        write!(f, "{phase} failed with {} errors", self.errors.len())
    }
}

impl IntoGraphQLErrors for DocumentErrors {
    fn into_graphql_errors(self) -> Vec<graphql::Error> {
        self.errors
    }
}

impl DocumentErrors {
    pub fn new(phase: DocumentPhase, errors: Vec<graphql::Error>) -> Self {
        let errors = errors
            .into_iter()
            .map(|mut error| {
                error
                    .extensions
                    .entry("code")
                    .or_insert_with(|| phase.extension_code().into());
                HttpExtension {
                    status: Some(http::StatusCode::BAD_REQUEST.as_u16()),
                    headers: IndexMap::new(),
                    spec: Some(true),
                }
                .merge_into(&mut error.extensions);
                error
            })
            .collect();
        Self { phase, errors }
    }

    pub(crate) fn from_diagnostics(
        phase: DocumentPhase,
        diagnostics: &apollo_compiler::validation::DiagnosticList,
    ) -> Self {
        let errors = diagnostics
            .iter()
            .map(|diagnostic| {
                let error = diagnostic.to_json();
                graphql::Error::builder()
                    .message(error.message)
                    .locations(
                        error
                            .locations
                            .iter()
                            .map(|location| graphql::Location {
                                line: location.line as u32,
                                column: location.column as u32,
                            })
                            .collect::<Vec<_>>(),
                    )
                    .build()
            })
            .collect();
        Self::new(phase, errors)
    }
}
