//! Axum glue: routes the GraphQL endpoint to a [`RouterService`] and serves it.

use std::future::Future;

use axum::Router;
use axum::extract::Request;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::any;
use http::StatusCode;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::Configuration;
use crate::error::Aborted;
use crate::services::RouterService;
use crate::services::router;

/// Not a standard status, but the one proxies use for requests the client gave up on.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Route every method on the configured GraphQL path to `service`.
///
/// Methods other than `GET` and `POST` are answered by the service itself, with a `405`.
pub fn make_router(service: RouterService, configuration: &Configuration) -> Router {
    Router::new()
        .route(configuration.server().graphql_path(), any(handle_graphql))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn handle_graphql(State(service): State<RouterService>, request: Request) -> Response {
    let request = request.map(|body| body.boxed_unsync());
    match service.oneshot(router::Request::from(request)).await {
        Ok(response) => response.response.map(axum::body::Body::new).into_response(),
        Err(error) if error.is::<Aborted>() => {
            tracing::debug!("request aborted");
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
                .into_response()
        }
        Err(error) => {
            tracing::error!(%error, "router service call failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve `router` on `listener` until `shutdown` resolves, then wait for open connections
/// to finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        tracing::info!(%address, "GraphQL endpoint exposed");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
