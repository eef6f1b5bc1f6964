//! Allow-lists of request and response headers.

use std::collections::HashSet;
use std::ops::ControlFlow;

use http::HeaderMap;
use http::header::HeaderName;
use tower::BoxError;

use crate::Context;
use crate::configuration::Headers;
use crate::plugin::Plugin;
use crate::services::router;

/// Removes the headers missing from the configured allow-lists.
///
/// Request headers are filtered before the parameters are extracted, response headers right
/// before the response is sent. A list that is not configured lets everything through.
#[derive(Clone, Debug, Default)]
pub struct AllowedHeaders {
    request: Option<HashSet<HeaderName>>,
    response: Option<HashSet<HeaderName>>,
}

impl AllowedHeaders {
    pub fn new(configuration: &Headers) -> Self {
        Self {
            request: configuration.allowed_request.as_deref().map(header_names),
            response: configuration.allowed_response.as_deref().map(header_names),
        }
    }

    pub(crate) fn is_noop(&self) -> bool {
        self.request.is_none() && self.response.is_none()
    }
}

fn header_names(names: &[String]) -> HashSet<HeaderName> {
    names
        .iter()
        .filter_map(|name| match HeaderName::try_from(name.to_ascii_lowercase()) {
            Ok(name) => Some(name),
            Err(error) => {
                tracing::warn!(header = %name, %error, "ignoring invalid header name");
                None
            }
        })
        .collect()
}

fn retain(headers: &mut HeaderMap, allowed: &HashSet<HeaderName>) {
    let removed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| !allowed.contains(*name))
        .cloned()
        .collect();
    for name in removed {
        headers.remove(&name);
    }
}

#[async_trait::async_trait]
impl Plugin for AllowedHeaders {
    async fn on_request(
        &self,
        request: &mut http::request::Parts,
        _context: &Context,
    ) -> Result<ControlFlow<http::Response<router::Body>>, BoxError> {
        if let Some(allowed) = &self.request {
            retain(&mut request.headers, allowed);
        }
        Ok(ControlFlow::Continue(()))
    }

    fn on_response(&self, response: &mut http::response::Parts, _context: &Context) {
        if let Some(allowed) = &self.response {
            retain(&mut response.headers, allowed);
        }
    }

    fn name(&self) -> &'static str {
        "allowed_headers"
    }
}
