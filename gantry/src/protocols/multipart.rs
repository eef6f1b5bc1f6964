use std::pin::Pin;
use std::task::Poll;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use http::HeaderValue;
use http::header::CONNECTION;
use http::header::CONTENT_TYPE;
use http::header::TRANSFER_ENCODING;

use super::Error;
use super::JsonChunks;
use crate::services::router::body;
use crate::services::router::Body;

const CONTENT_TYPE_VALUE: &str = "multipart/mixed; boundary=\"-\"";
const OPENING_BOUNDARY: &[u8] = b"---";
const PART_HEADERS: &[u8] = b"\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: ";
const BOUNDARY: &[u8] = b"\r\n---";
const CLOSING_BOUNDARY: &[u8] = b"\r\n-----\r\n";

/// A `multipart/mixed` body with one JSON part per result.
///
/// The body opens with a bare boundary so that headers reach the client before the first
/// result is ready.
pub(crate) struct Multipart {
    stream: JsonChunks,
    is_first_chunk: bool,
    is_terminated: bool,
}

impl Multipart {
    pub(crate) fn new(stream: JsonChunks) -> Self {
        Self {
            stream,
            is_first_chunk: true,
            is_terminated: false,
        }
    }
}

impl Stream for Multipart {
    type Item = Result<Bytes, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.is_terminated {
            return Poll::Ready(None);
        }
        if self.is_first_chunk {
            self.is_first_chunk = false;
            return Poll::Ready(Some(Ok(Bytes::from_static(OPENING_BOUNDARY))));
        }
        match self.stream.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(json))) => {
                let length = json.len().to_string();
                let mut buf = Vec::with_capacity(
                    PART_HEADERS.len() + length.len() + 4 + json.len() + BOUNDARY.len(),
                );
                buf.extend_from_slice(PART_HEADERS);
                buf.extend_from_slice(length.as_bytes());
                buf.extend_from_slice(b"\r\n\r\n");
                buf.extend_from_slice(&json);
                buf.extend_from_slice(BOUNDARY);
                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(Some(Err(error))) => {
                self.is_terminated = true;
                Poll::Ready(Some(Err(error.into())))
            }
            Poll::Ready(None) => {
                self.is_terminated = true;
                Poll::Ready(Some(Ok(Bytes::from_static(CLOSING_BOUNDARY))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) fn response(multipart: Multipart) -> http::Response<Body> {
    let mut response = http::Response::new(body::from_result_stream(multipart));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_VALUE));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::graphql;

    fn chunks(responses: Vec<graphql::Response>) -> JsonChunks {
        futures::stream::iter(responses)
            .map(|response| serde_json::to_vec(&response))
            .boxed()
    }

    #[tokio::test]
    async fn parts_are_framed() {
        let multipart = Multipart::new(chunks(vec![
            graphql::Response::builder()
                .data(json!({ "a": 1 }))
                .has_next(true)
                .build(),
            graphql::Response::builder().has_next(false).build(),
        ]));
        let body: Vec<Bytes> = multipart.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(
            body.concat(),
            b"---\
              \r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: 31\r\n\r\n\
              {\"data\":{\"a\":1},\"hasNext\":true}\r\n---\
              \r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: 17\r\n\r\n\
              {\"hasNext\":false}\r\n---\
              \r\n-----\r\n"
                .to_vec()
        );
    }

    #[tokio::test]
    async fn empty_stream_is_closed() {
        let body: Vec<Bytes> = Multipart::new(chunks(vec![]))
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(body.concat(), b"---\r\n-----\r\n".to_vec());
    }

    #[tokio::test]
    async fn dropping_the_body_cancels_the_source() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let hook_count = cancelled.clone();
        let first = graphql::Response::builder().data(json!(1)).build();
        let source = graphql::ResultStream::new(
            futures::stream::iter(vec![first]).chain(futures::stream::pending()),
        )
        .with_cancel_hook(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });
        let mut multipart =
            Multipart::new(source.map(|response| serde_json::to_vec(&response)).boxed());
        assert_eq!(multipart.next().await.unwrap().unwrap(), "---");
        assert!(multipart.next().await.unwrap().is_ok());
        drop(multipart);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
