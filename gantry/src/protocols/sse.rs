use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use futures::stream::select;
use http::HeaderValue;
use http::header::CACHE_CONTROL;
use http::header::CONNECTION;
use http::header::CONTENT_ENCODING;
use http::header::CONTENT_TYPE;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_stream::once;
use tokio_stream::wrappers::IntervalStream;

use super::Error;
use super::JsonChunks;
use crate::services::router::body;
use crate::services::router::Body;

const HEARTBEAT: &[u8] = b":\n\n";

enum MessageKind {
    Heartbeat,
    Message(Result<Vec<u8>, serde_json::Error>),
    Eof,
}

/// A `text/event-stream` body with one `data` event per result.
///
/// While waiting for the next result, a comment is sent every heartbeat interval to keep
/// intermediaries from closing the connection.
pub(crate) struct ServerSentEvents {
    stream: BoxStream<'static, MessageKind>,
    is_terminated: bool,
}

impl ServerSentEvents {
    pub(crate) fn new(stream: JsonChunks, heartbeat: Option<Duration>) -> Self {
        let messages = stream
            .map(MessageKind::Message)
            .chain(once(MessageKind::Eof));
        let stream = match heartbeat {
            Some(period) => {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                select(
                    messages,
                    IntervalStream::new(interval).map(|_| MessageKind::Heartbeat),
                )
                .boxed()
            }
            None => messages.boxed(),
        };
        Self {
            stream,
            is_terminated: false,
        }
    }
}

impl Stream for ServerSentEvents {
    type Item = Result<Bytes, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.is_terminated {
            return Poll::Ready(None);
        }
        match self.stream.poll_next_unpin(cx) {
            Poll::Ready(Some(MessageKind::Heartbeat)) => {
                Poll::Ready(Some(Ok(Bytes::from_static(HEARTBEAT))))
            }
            Poll::Ready(Some(MessageKind::Message(Ok(json)))) => {
                let mut buf = Vec::with_capacity(json.len() + 8);
                buf.extend_from_slice(b"data: ");
                buf.extend_from_slice(&json);
                buf.extend_from_slice(b"\n\n");
                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(Some(MessageKind::Message(Err(error)))) => {
                self.is_terminated = true;
                Poll::Ready(Some(Err(error.into())))
            }
            Poll::Ready(Some(MessageKind::Eof)) | Poll::Ready(None) => {
                self.is_terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) fn response(events: ServerSentEvents) -> http::Response<Body> {
    let mut response = http::Response::new(body::from_result_stream(events));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("none"));
    response
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graphql;

    fn chunks(responses: Vec<graphql::Response>) -> JsonChunks {
        futures::stream::iter(responses)
            .map(|response| serde_json::to_vec(&response))
            .boxed()
    }

    #[tokio::test]
    async fn one_event_per_result() {
        let events = ServerSentEvents::new(
            chunks(vec![
                graphql::Response::builder().data(json!({ "n": 1 })).build(),
                graphql::Response::builder().data(json!({ "n": 2 })).build(),
            ]),
            Some(Duration::from_secs(60)),
        );
        let body: Vec<Bytes> = events.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(
            body.concat(),
            b"data: {\"data\":{\"n\":1}}\n\ndata: {\"data\":{\"n\":2}}\n\n".to_vec()
        );
    }

    #[tokio::test]
    async fn heartbeats_while_waiting() {
        let mut events = ServerSentEvents::new(
            futures::stream::pending().boxed(),
            Some(Duration::from_millis(10)),
        );
        assert_eq!(events.next().await.unwrap().unwrap(), ":\n\n");
        assert_eq!(events.next().await.unwrap().unwrap(), ":\n\n");
    }

    #[tokio::test]
    async fn headers() {
        let response = response(ServerSentEvents::new(chunks(vec![]), None));
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[CONNECTION], "keep-alive");
        assert_eq!(response.headers()[CONTENT_ENCODING], "none");
        let body = body::into_bytes(response.into_body()).await.unwrap();
        assert!(body.is_empty());
    }
}
