//! Types related to GraphQL requests, responses, etc.

pub(crate) mod http_ext;
mod request;
mod response;
mod stream;

use std::fmt;
use std::sync::Arc;

use apollo_compiler::response::GraphQLError;
use apollo_compiler::response::ResponseDataPathSegment;
use derivative::Derivative;
pub use http_ext::HttpExtension;
pub use request::Request;
pub use response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map as JsonMap;
pub use stream::ResultStream;

use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::from_compiler_map;

/// Shared handle on the failure a GraphQL [`Error`] was built from.
pub type OriginalError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The error location
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
///
/// Converted to (or from) JSON with serde.
#[derive(Clone, Default, Derivative, Serialize, Deserialize)]
#[derivative(Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in [`Response::data`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,

    /// The failure this error wraps, if it did not start out as a GraphQL error.
    #[serde(skip)]
    #[derivative(Debug = "ignore", PartialEq = "ignore")]
    original_error: Option<OriginalError>,
}

#[buildstructor::buildstructor]
impl Error {
    /// Only the message is required. `.extension_code(code)` fills in `extensions.code`
    /// unless `.extension("code", ..)` already did.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        mut extensions: JsonMap<String, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(code));
        }
        Self {
            message,
            locations,
            path,
            extensions,
            original_error: None,
        }
    }

    /// Attach the failure this error was built from.
    pub fn with_original_error<E>(mut self, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.original_error = Some(Arc::new(error));
        self
    }

    pub(crate) fn with_boxed_original_error(mut self, error: tower::BoxError) -> Self {
        self.original_error = Some(Arc::from(error));
        self
    }

    /// The failure this error was built from, if any.
    pub fn original_error(&self) -> Option<&OriginalError> {
        self.original_error.as_ref()
    }

    /// Extract the error code from [`Error::extensions`] as a String if it is set.
    pub fn extension_code(&self) -> Option<String> {
        self.extensions.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Bool(_) => None,
        })
    }

    /// The `http` extension of this error, when present and well formed.
    pub fn http_extension(&self) -> Option<HttpExtension> {
        HttpExtension::from_extensions(&self.extensions)
    }

    /// Returns `true` when this error was raised as a GraphQL error, either directly or by
    /// wrapping (any number of times) another GraphQL error that was.
    ///
    /// Anything else is considered unexpected and is subject to masking.
    pub fn is_original(&self) -> bool {
        match &self.original_error {
            None => true,
            Some(original) => original
                .downcast_ref::<Error>()
                .is_some_and(Error::is_original),
        }
    }

    /// Returns `true` when the `unexpected` extension flag is set.
    pub(crate) fn is_flagged_unexpected(&self) -> bool {
        matches!(self.extensions.get("unexpected"), Some(Value::Bool(true)))
    }

    /// Set the path and location of this error unless it already carries them.
    pub(crate) fn located_at(mut self, path: &Path, locations: &[Location]) -> Self {
        if self.path.is_none() {
            self.path = Some(path.clone());
        }
        if self.locations.is_empty() {
            self.locations = locations.to_vec();
        }
        self
    }
}

impl From<GraphQLError> for Error {
    fn from(error: GraphQLError) -> Self {
        let GraphQLError {
            message,
            locations,
            path,
            extensions,
        } = error;
        let locations = locations
            .into_iter()
            .map(|location| Location {
                line: location.line as u32,
                column: location.column as u32,
            })
            .collect();
        let path = (!path.is_empty()).then(|| {
            path.into_iter()
                .map(|segment| match segment {
                    ResponseDataPathSegment::Field(name) => PathElement::Key(name.to_string()),
                    ResponseDataPathSegment::ListIndex(index) => PathElement::Index(index),
                })
                .collect()
        });
        Self {
            message,
            locations,
            path,
            extensions: from_compiler_map(extensions),
            original_error: None,
        }
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.original_error
            .as_deref()
            .map(|error| error as &(dyn std::error::Error + 'static))
    }
}

/// Trait used to convert expected errors into a list of GraphQL errors
pub(crate) trait IntoGraphQLErrors
where
    Self: Sized,
{
    fn into_graphql_errors(self) -> Vec<Error>;
}
