//! The `http` extension carried by GraphQL errors and results.
//!
//! Resolvers and pipeline stages use it to influence the HTTP status and headers of the
//! response. A response combines all of them: the status is the highest one found, while
//! headers are merged in order so that the last error setting a header wins.

use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::StatusCode;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use super::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;

pub(crate) const HTTP_EXTENSION: &str = "http";

/// HTTP metadata attached to an error or a result under `extensions.http`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpExtension {
    /// The status this error asks for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Headers to add to the response.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,

    /// Set on errors mandated by the GraphQL over HTTP specification. Those do not change the
    /// status of `application/json` responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<bool>,
}

impl HttpExtension {
    pub(crate) fn from_extensions(extensions: &Object) -> Option<Self> {
        let value = extensions.get(HTTP_EXTENSION)?;
        match serde_json::from_value(value.clone()) {
            Ok(extension) => Some(extension),
            Err(error) => {
                tracing::debug!(%error, "ignoring malformed http extension");
                None
            }
        }
    }

    /// Insert this extension into an extensions map, filling in only what is not set yet.
    pub(crate) fn merge_into(self, extensions: &mut Object) {
        let entry = extensions
            .entry(HTTP_EXTENSION)
            .or_insert_with(|| Value::Object(Object::new()));
        let Value::Object(http) = entry else {
            return;
        };
        if let Some(status) = self.status {
            http.entry("status").or_insert(Value::from(status));
        }
        if let Some(spec) = self.spec {
            http.entry("spec").or_insert(Value::from(spec));
        }
        if !self.headers.is_empty() {
            let headers = http
                .entry("headers")
                .or_insert_with(|| Value::Object(Object::new()));
            if let Value::Object(headers) = headers {
                for (name, value) in self.headers {
                    headers.entry(name).or_insert(Value::String(value));
                }
            }
        }
    }

    fn is_spec(&self) -> bool {
        self.spec.unwrap_or(false)
    }
}

/// Compute the status and extra headers of a response by looking at the `http` extensions of
/// the result and of every one of its errors.
///
/// `is_application_json` must be set when the response is sent as `application/json`.
pub(crate) fn response_init(
    response: &Response,
    is_application_json: bool,
    headers: &mut HeaderMap,
) -> StatusCode {
    let mut status: Option<u16> = None;
    let mut unexpected_error_exists = false;

    if let Some(http) = HttpExtension::from_extensions(&response.extensions) {
        append_headers(headers, &http.headers);
        status = http.status;
    }

    if response.errors.is_empty() {
        status = status.or(Some(200));
    }

    for error in &response.errors {
        match error.http_extension() {
            Some(http) => {
                append_headers(headers, &http.headers);
                if is_application_json && http.is_spec() {
                    continue;
                }
                if let Some(error_status) = http.status {
                    if status.is_none_or(|current| error_status > current) {
                        status = Some(error_status);
                    }
                }
            }
            None => {
                if !error.is_original() || error.is_flagged_unexpected() {
                    unexpected_error_exists = true;
                }
            }
        }
    }

    let status = status.unwrap_or(if unexpected_error_exists && response.data.is_none() {
        500
    } else {
        200
    });

    StatusCode::from_u16(status).unwrap_or_else(|_| {
        tracing::warn!(status, "invalid status code in http extension");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn append_headers(headers: &mut HeaderMap, extension_headers: &IndexMap<String, String>) {
    for (name, value) in extension_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "ignoring invalid header in http extension"),
        }
    }
}
