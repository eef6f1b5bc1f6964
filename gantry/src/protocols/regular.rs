//! Single JSON documents.

use http::HeaderMap;
use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;

use super::Error;
use crate::graphql;
use crate::graphql::http_ext::response_init;
use crate::services::layers::content_negotiation::NegotiatedMediaType;
use crate::services::router::body;
use crate::services::router::Body;

pub(crate) fn single(
    response: &graphql::Response,
    media_type: NegotiatedMediaType,
) -> Result<http::Response<Body>, Error> {
    let mut headers = HeaderMap::new();
    let status = response_init(
        response,
        media_type == NegotiatedMediaType::Json,
        &mut headers,
    );
    let json = serde_json::to_vec(response)?;
    Ok(json_response(status, headers, json, media_type))
}

/// A JSON array of results, always sent with a `200`: every element reports its own errors.
/// Headers asked for by the elements are merged in order.
pub(crate) fn batch(
    responses: &[graphql::Response],
    media_type: NegotiatedMediaType,
) -> Result<http::Response<Body>, Error> {
    let mut headers = HeaderMap::new();
    merge_batch_headers(
        responses,
        media_type == NegotiatedMediaType::Json,
        &mut headers,
    );
    let json = serde_json::to_vec(responses)?;
    Ok(json_response(StatusCode::OK, headers, json, media_type))
}

pub(crate) fn merge_batch_headers(
    responses: &[graphql::Response],
    is_application_json: bool,
    headers: &mut HeaderMap,
) {
    for response in responses {
        // the status of an element has no bearing on the batch
        response_init(response, is_application_json, headers);
    }
}

fn json_response(
    status: StatusCode,
    headers: HeaderMap,
    json: Vec<u8>,
    media_type: NegotiatedMediaType,
) -> http::Response<Body> {
    let length = json.len();
    let mut response = http::Response::new(body::from_bytes(json));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    if let Ok(content_type) = HeaderValue::try_from(format!("{media_type}; charset=utf-8")) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn error(message: &str, http: serde_json::Value) -> graphql::Error {
        graphql::Error::builder()
            .message(message)
            .extension("http", http)
            .build()
    }

    #[tokio::test]
    async fn content_type_and_length() {
        let result = graphql::Response::builder()
            .data(json!({ "ping": "pong" }))
            .build();
        let response = single(&result, NegotiatedMediaType::GraphQLResponseJson).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/graphql-response+json; charset=utf-8"
        );
        assert_eq!(response.headers()[CONTENT_LENGTH], "24");
        let body = body::into_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, r#"{"data":{"ping":"pong"}}"#);
    }

    #[test]
    fn spec_errors_keep_json_responses_ok() {
        let result = graphql::Response::from_errors(vec![error(
            "Cannot query field",
            json!({ "status": 400, "spec": true }),
        )]);
        assert_eq!(
            single(&result, NegotiatedMediaType::Json).unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            single(&result, NegotiatedMediaType::GraphQLResponseJson)
                .unwrap()
                .status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn batches_are_ok_whatever_their_elements_ask_for() {
        let results = vec![
            graphql::Response::builder().data(json!({ "a": 1 })).build(),
            graphql::Response::from_errors(vec![error(
                "B",
                json!({ "status": 401, "headers": { "x-b": "1" } }),
            )]),
        ];
        let response = batch(&results, NegotiatedMediaType::Json).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-b"], "1");
        let body = body::into_bytes(response.into_body()).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            json!([
                { "data": { "a": 1 } },
                { "errors": [{ "message": "B", "extensions": { "http": { "status": 401, "headers": { "x-b": "1" } } } }] }
            ])
        );
    }
}
