use std::fmt;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::Response;

type CancelHook = Box<dyn FnOnce() + Send>;

/// An asynchronous sequence of GraphQL [`Response`]s, as produced by subscriptions and
/// incremental delivery.
///
/// The sequence owns a cancel hook which is run exactly once if the sequence is released
/// before it completes: when [`ResultStream::cancel`] is called, or when the stream is
/// dropped early (for instance because the client went away and the HTTP body was torn
/// down). A sequence that runs to completion never runs its hook.
pub struct ResultStream {
    inner: Option<BoxStream<'static, Response>>,
    on_cancel: Vec<CancelHook>,
}

impl ResultStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Response> + Send + 'static,
    {
        Self {
            inner: Some(stream.boxed()),
            on_cancel: Vec::new(),
        }
    }

    /// A sequence made of a single response.
    pub fn once(response: Response) -> Self {
        Self::new(futures::stream::once(async move { response }))
    }

    /// Register a hook run if the sequence is released before it completes.
    ///
    /// Hooks run in registration order.
    pub fn with_cancel_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel.push(Box::new(hook));
        self
    }

    /// Returns `true` once the underlying sequence has completed or has been cancelled.
    pub fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the underlying sequence and run the cancel hooks if it had not completed.
    pub fn cancel(&mut self) {
        if let Some(inner) = self.inner.take() {
            drop(inner);
            for hook in self.on_cancel.drain(..) {
                hook();
            }
        }
    }

    /// Transform every response of the sequence, keeping the cancel hooks.
    pub fn map_responses<F>(mut self, f: F) -> Self
    where
        F: FnMut(Response) -> Response + Send + 'static,
    {
        let inner = self.inner.take().map(|inner| inner.map(f).boxed());
        Self {
            inner,
            on_cancel: std::mem::take(&mut self.on_cancel),
        }
    }
}

impl Stream for ResultStream {
    type Item = Response;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                self.inner = None;
                self.on_cancel.clear();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("terminated", &self.is_terminated())
            .field("cancel_hooks", &self.on_cancel.len())
            .finish()
    }
}
