//! Wire formats of GraphQL responses.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::ACCEPT;

use crate::graphql;
use crate::graphql::http_ext::response_init;
use crate::services::layers::content_negotiation::NegotiatedMediaType;
use crate::services::layers::content_negotiation::Negotiation;
use crate::services::router::body;
use crate::services::router::Body;

pub(crate) mod multipart;
pub(crate) mod regular;
pub(crate) mod sse;

const SUBSCRIPTIONS_NOT_SUPPORTED: &str = "Subscriptions are not supported";

/// Serialized JSON payloads, one per part of a streamed response.
pub(crate) type JsonChunks = BoxStream<'static, Result<Vec<u8>, serde_json::Error>>;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("serialization error")]
    SerdeError(#[from] serde_json::Error),
}

/// What a request produced, ready to be encoded.
#[derive(Debug)]
pub(crate) enum Payload {
    Single(graphql::Response),
    Batch(Vec<graphql::Response>),
    Stream(graphql::ResultStream),
}

impl Payload {
    pub(crate) fn is_stream(&self) -> bool {
        matches!(self, Payload::Stream(_))
    }
}

/// The result sent when a stream of results cannot be delivered in a format the client
/// accepts.
pub(crate) fn subscriptions_not_supported() -> graphql::Response {
    graphql::Response::from_errors(vec![
        graphql::Error::builder()
            .message(SUBSCRIPTIONS_NOT_SUPPORTED)
            .build(),
    ])
}

/// A bodyless `406` listing what the server could have answered with.
pub(crate) fn not_acceptable(acceptable: &[NegotiatedMediaType]) -> http::Response<Body> {
    let mut response = http::Response::new(body::empty());
    *response.status_mut() = StatusCode::NOT_ACCEPTABLE;
    match HeaderValue::try_from(Negotiation::accept_header(acceptable)) {
        Ok(accept) => {
            response.headers_mut().insert(ACCEPT, accept);
        }
        Err(error) => tracing::warn!(%error, "invalid accept header"),
    }
    response
}

/// Encode `payload` as `media_type`.
///
/// Single results sent in a streaming format become a one part stream, with the status their
/// errors ask for. Batches and streams are always sent with a `200`.
pub(crate) fn build_response(
    payload: Payload,
    media_type: NegotiatedMediaType,
    heartbeat: Option<Duration>,
) -> Result<http::Response<Body>, Error> {
    if !media_type.is_streaming() {
        return match payload {
            Payload::Single(response) => regular::single(&response, media_type),
            Payload::Batch(responses) => regular::batch(&responses, media_type),
            Payload::Stream(stream) => {
                drop(stream);
                regular::single(&subscriptions_not_supported(), media_type)
            }
        };
    }

    let mut headers = HeaderMap::new();
    let (status, chunks): (StatusCode, JsonChunks) = match payload {
        Payload::Single(response) => (
            response_init(&response, false, &mut headers),
            futures::stream::once(async move { serde_json::to_vec(&response) }).boxed(),
        ),
        Payload::Batch(responses) => {
            regular::merge_batch_headers(&responses, false, &mut headers);
            (
                StatusCode::OK,
                futures::stream::once(async move { serde_json::to_vec(&responses) }).boxed(),
            )
        }
        Payload::Stream(stream) => (
            StatusCode::OK,
            stream.map(|response| serde_json::to_vec(&response)).boxed(),
        ),
    };

    let mut response = match media_type {
        NegotiatedMediaType::MultipartMixed => {
            multipart::response(multipart::Multipart::new(chunks))
        }
        _ => sse::response(sse::ServerSentEvents::new(chunks, heartbeat)),
    };
    *response.status_mut() = status;
    for (name, value) in headers {
        if let Some(name) = name {
            response.headers_mut().entry(name).or_insert(value);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use http::header::CONTENT_TYPE;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn single_result_in_a_streaming_format_keeps_its_status() {
        let result = graphql::Response::builder()
            .error(
                graphql::Error::builder()
                    .message("teapot")
                    .extension("http", json!({ "status": 418, "headers": { "x-tea": "1" } }))
                    .build(),
            )
            .build();
        let response = build_response(
            Payload::Single(result),
            NegotiatedMediaType::EventStream,
            None,
        )
        .unwrap();
        assert_eq!(response.status().as_u16(), 418);
        assert_eq!(response.headers()["x-tea"], "1");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        let body = body::into_bytes(response.into_body()).await.unwrap();
        assert_eq!(
            body,
            "data: {\"errors\":[{\"message\":\"teapot\",\"extensions\":{\"http\":{\"status\":418,\"headers\":{\"x-tea\":\"1\"}}}}]}\n\n"
        );
    }

    #[test]
    fn batches_in_a_streaming_format_are_ok() {
        let results = vec![
            graphql::Response::builder().data(json!({ "a": 1 })).build(),
            graphql::Response::from_errors(vec![
                graphql::Error::builder()
                    .message("teapot")
                    .extension("http", json!({ "status": 418, "headers": { "x-tea": "1" } }))
                    .build(),
            ]),
        ];
        let response = build_response(
            Payload::Batch(results),
            NegotiatedMediaType::MultipartMixed,
            None,
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-tea"], "1");
    }

    #[tokio::test]
    async fn streams_in_a_json_format_are_rejected() {
        let response = build_response(
            Payload::Stream(graphql::ResultStream::new(futures::stream::pending())),
            NegotiatedMediaType::Json,
            None,
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body::into_bytes(response.into_body()).await.unwrap();
        assert_eq!(
            body,
            r#"{"errors":[{"message":"Subscriptions are not supported"}]}"#
        );
    }

    #[test]
    fn not_acceptable_is_bodyless() {
        let response = not_acceptable(&[
            NegotiatedMediaType::EventStream,
            NegotiatedMediaType::MultipartMixed,
        ]);
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            response.headers()[ACCEPT],
            "text/event-stream; charset=utf-8, multipart/mixed"
        );
    }
}
