//! Plugin system.
//!
//! Plugins intercept the phases of a request. They are called in registration order, and any
//! of them may stop a request: by returning an error, which is reported to the client as
//! GraphQL errors, or (from [`Plugin::on_request`]) by answering with a response of its own.

use std::ops::ControlFlow;
use std::sync::Arc;

use tower::BoxError;

use crate::Context;
use crate::engine::ExecutionResult;
use crate::graphql;
use crate::services::router;

#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called with the HTTP request before its parameters are extracted.
    ///
    /// Breaking out sends the given response to the client as is.
    async fn on_request(
        &self,
        _request: &mut http::request::Parts,
        _context: &Context,
    ) -> Result<ControlFlow<http::Response<router::Body>>, BoxError> {
        Ok(ControlFlow::Continue(()))
    }

    /// Called once the parameters of a request have been checked, before persisted queries
    /// are resolved.
    async fn on_params(
        &self,
        _request: &mut graphql::Request,
        _context: &Context,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called with what the engine produced, before it is encoded.
    async fn on_execution_result(
        &self,
        _result: &mut ExecutionResult,
        _context: &Context,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called with the HTTP response before it is sent.
    fn on_response(&self, _response: &mut http::response::Parts, _context: &Context) {}

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Run `on_request` on every plugin until one stops the request.
pub(crate) async fn on_request(
    plugins: &[Arc<dyn Plugin>],
    request: &mut http::request::Parts,
    context: &Context,
) -> Result<ControlFlow<http::Response<router::Body>>, BoxError> {
    for plugin in plugins {
        if let ControlFlow::Break(response) = plugin.on_request(request, context).await? {
            tracing::debug!(plugin = plugin.name(), "request answered by plugin");
            return Ok(ControlFlow::Break(response));
        }
    }
    Ok(ControlFlow::Continue(()))
}

pub(crate) async fn on_params(
    plugins: &[Arc<dyn Plugin>],
    request: &mut graphql::Request,
    context: &Context,
) -> Result<(), BoxError> {
    for plugin in plugins {
        plugin.on_params(request, context).await?;
    }
    Ok(())
}

pub(crate) async fn on_execution_result(
    plugins: &[Arc<dyn Plugin>],
    result: &mut ExecutionResult,
    context: &Context,
) -> Result<(), BoxError> {
    for plugin in plugins {
        plugin.on_execution_result(result, context).await?;
    }
    Ok(())
}

pub(crate) fn on_response(
    plugins: &[Arc<dyn Plugin>],
    response: &mut http::response::Parts,
    context: &Context,
) {
    for plugin in plugins {
        plugin.on_response(response, context);
    }
}
