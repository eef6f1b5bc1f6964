//! Extraction of GraphQL parameters from an HTTP request.
//!
//! Parameters are returned as raw JSON so that [`super::check_params`] can report exactly what
//! was wrong with them.

use bytes::Bytes;
use http::Method;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use mediatype::MediaType;
use mediatype::names::APPLICATION;
use mediatype::names::JSON;

use crate::error::RequestError;
use crate::json_ext::Object;
use crate::json_ext::Value;

const APPLICATION_GRAPHQL: &str = "graphql";
const FORM_URLENCODED: &str = "x-www-form-urlencoded";

/// The parameters found in a request body or query string.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExtractedParams {
    Single(Value),
    /// A JSON array body.
    Batch(Vec<Value>),
}

/// How the parameters of a request are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestEncoding {
    QueryString,
    Json,
    FormUrlEncoded,
    GraphQLString,
}

impl RequestEncoding {
    /// Find the parser for a request, from its method and `Content-Type`.
    pub(crate) fn for_request(parts: &Parts) -> Result<Self, RequestError> {
        match parts.method {
            Method::GET => Ok(RequestEncoding::QueryString),
            Method::POST => {
                let content_type = parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| MediaType::parse(value).ok())
                    .ok_or(RequestError::UnsupportedMediaType)?;
                if content_type.ty != APPLICATION {
                    return Err(RequestError::UnsupportedMediaType);
                }
                if content_type.subty == JSON {
                    Ok(RequestEncoding::Json)
                } else if content_type.subty.as_str() == FORM_URLENCODED {
                    Ok(RequestEncoding::FormUrlEncoded)
                } else if content_type.subty.as_str() == APPLICATION_GRAPHQL
                    && content_type.suffix.is_none()
                {
                    Ok(RequestEncoding::GraphQLString)
                } else {
                    Err(RequestError::UnsupportedMediaType)
                }
            }
            _ => Err(RequestError::MethodNotAllowed),
        }
    }

    pub(crate) fn parse(self, parts: &Parts, body: &Bytes) -> Result<ExtractedParams, RequestError> {
        match self {
            RequestEncoding::QueryString => {
                from_urlencoded(parts.uri.query().unwrap_or_default().as_bytes())
                    .map(ExtractedParams::Single)
            }
            RequestEncoding::FormUrlEncoded => from_urlencoded(body).map(ExtractedParams::Single),
            RequestEncoding::GraphQLString => {
                let query = std::str::from_utf8(body).map_err(|_| RequestError::MalformedBody)?;
                let mut params = Object::new();
                params.insert("query".to_string(), Value::String(query.to_string()));
                Ok(ExtractedParams::Single(Value::Object(params)))
            }
            RequestEncoding::Json => {
                match serde_json::from_slice::<Value>(body)
                    .map_err(|_| RequestError::MalformedBody)?
                {
                    Value::Array(batch) => Ok(ExtractedParams::Batch(batch)),
                    params => Ok(ExtractedParams::Single(params)),
                }
            }
        }
    }
}

/// Parameters of a query string or a form body. `variables` and `extensions` are JSON encoded,
/// every other value is kept as a string.
fn from_urlencoded(input: &[u8]) -> Result<Value, RequestError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(input).map_err(|_| RequestError::MalformedBody)?;
    let mut params = Object::new();
    for (key, value) in pairs {
        let value = match key.as_str() {
            "variables" => parse_json_param(&value, "Variables")?,
            "extensions" => parse_json_param(&value, "Extensions")?,
            _ => Value::String(value),
        };
        params.insert(key, value);
    }
    Ok(Value::Object(params))
}

fn parse_json_param(value: &str, name: &'static str) -> Result<Value, RequestError> {
    if value.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(value).map_err(|_| RequestError::MalformedQueryString(name))
}
