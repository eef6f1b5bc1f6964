//! The HTTP facing stage of the pipeline.

use std::collections::HashMap;

use bytes::Bytes;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use static_assertions::assert_impl_all;
use tower::BoxError;

use self::body::RouterBody;
use crate::Context;

pub type BoxService = tower::util::BoxService<Request, Response, BoxError>;
pub type BoxCloneService = tower::util::BoxCloneService<Request, Response, BoxError>;
pub type ServiceResult = Result<Response, BoxError>;
pub type Body = RouterBody;

pub mod body;
pub(crate) mod service;

assert_impl_all!(Request: Send);
/// An HTTP request entering the pipeline, along with the context of the GraphQL request it
/// carries.
#[non_exhaustive]
pub struct Request {
    pub router_request: http::Request<Body>,

    /// Shared with plugins, the context factory and resolvers.
    pub context: Context,
}

impl From<http::Request<Body>> for Request {
    fn from(router_request: http::Request<Body>) -> Self {
        Self {
            router_request,
            context: Context::new(),
        }
    }
}

impl From<(http::Request<Body>, Context)> for Request {
    fn from((router_request, context): (http::Request<Body>, Context)) -> Self {
        Self {
            router_request,
            context,
        }
    }
}

#[buildstructor::buildstructor]
impl Request {
    /// Build a request from its parts. Fails on invalid header names or values.
    #[builder(visibility = "pub")]
    fn new(
        context: Context,
        headers: HashMap<String, String>,
        uri: http::Uri,
        method: Method,
        body: Body,
    ) -> Result<Request, BoxError> {
        let mut router_request = http::Request::builder()
            .uri(uri)
            .method(method)
            .body(body)?;
        *router_request.headers_mut() = header_map(headers)?;
        Ok(Self {
            router_request,
            context,
        })
    }

    /// Test helper. Defaults to a bodyless `GET` on `http://example.com/graphql`.
    #[builder(visibility = "pub")]
    fn fake_new(
        context: Option<Context>,
        headers: HashMap<String, String>,
        uri: Option<http::Uri>,
        method: Option<Method>,
        body: Option<String>,
    ) -> Result<Request, BoxError> {
        let mut router_request = http::Request::builder()
            .uri(uri.unwrap_or_else(|| http::Uri::from_static("http://example.com/graphql")))
            .method(method.unwrap_or(Method::GET))
            .body(body.map(body::from_bytes).unwrap_or_else(body::empty))?;
        *router_request.headers_mut() = header_map(headers)?;
        Ok(Self {
            router_request,
            context: context.unwrap_or_default(),
        })
    }
}

fn header_map(headers: HashMap<String, String>) -> Result<HeaderMap, BoxError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        map.append(
            HeaderName::try_from(name.as_str())?,
            HeaderValue::try_from(value.as_str())?,
        );
    }
    Ok(map)
}

assert_impl_all!(Response: Send);
/// The HTTP response leaving the pipeline.
#[non_exhaustive]
#[derive(Debug)]
pub struct Response {
    pub response: http::Response<Body>,
    pub context: Context,
}

impl From<(http::Response<Body>, Context)> for Response {
    fn from((response, context): (http::Response<Body>, Context)) -> Self {
        Self { response, context }
    }
}

impl Response {
    /// Read the next chunk of the body, for streamed responses.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, axum::Error>> {
        use http_body_util::BodyExt;

        loop {
            match self.response.body_mut().frame().await? {
                Ok(frame) => match frame.into_data() {
                    Ok(data) => return Some(Ok(data)),
                    Err(_trailers) => continue,
                },
                Err(error) => return Some(Err(error)),
            }
        }
    }

    /// Read the rest of the body.
    pub async fn into_bytes(self) -> Result<Bytes, axum::Error> {
        body::into_bytes(self.response.into_body()).await
    }
}
