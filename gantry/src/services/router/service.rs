//! Implements the router phase of the request lifecycle.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use futures::future::join_all;
use http::request::Parts;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::Instrument;

use super::Body;
use super::body;
use crate::Configuration;
use crate::Context;
use crate::context::ContextFactory;
use crate::context::SideTable;
use crate::engine::Engine;
use crate::engine::ExecutionResult;
use crate::engine::SchemaFactory;
use crate::error::Aborted;
use crate::error::RequestError;
use crate::error::classify;
use crate::graphql;
use crate::json_ext::Value;
use crate::plugin;
use crate::plugin::Plugin;
use crate::plugins::headers::AllowedHeaders;
use crate::protocols;
use crate::protocols::Payload;
use crate::services::execution;
use crate::services::execution::ExecutionService;
use crate::services::layers::apq::APQLayer;
use crate::services::layers::apq::InMemoryPersistedQueryStore;
use crate::services::layers::apq::PersistedQueryStore;
use crate::services::layers::check_params::check_params;
use crate::services::layers::check_params::expand_batched_variables;
use crate::services::layers::content_negotiation::Negotiation;
use crate::services::layers::content_negotiation::negotiate;
use crate::services::layers::parser_cache::DocumentCache;
use crate::services::layers::request_parser::ExtractedParams;
use crate::services::layers::request_parser::RequestEncoding;
use crate::services::router;

/// Serves GraphQL over HTTP: extracts parameters, runs them through the plugins, persisted
/// queries and the engine, then encodes the outcome in the representation the client asked
/// for.
///
/// Every failure is turned into GraphQL errors, except for aborted requests which end the
/// service call with [`Aborted`].
#[derive(Clone)]
pub struct RouterService {
    execution: ExecutionService,
    apq: APQLayer,
    plugins: Arc<[Arc<dyn Plugin>]>,
    configuration: Arc<Configuration>,
    in_flight: SideTable<CancellationToken>,
}

#[buildstructor::buildstructor]
impl RouterService {
    /// Persisted queries are kept in memory unless a store is given. Every request uses the
    /// schema of the engine unless a schema factory is given. Plugins run in registration
    /// order, after the header allow-lists.
    #[builder(visibility = "pub")]
    fn new(
        engine: Arc<dyn Engine>,
        configuration: Option<Arc<Configuration>>,
        persisted_query_store: Option<Arc<dyn PersistedQueryStore>>,
        schema_factory: Option<Arc<dyn SchemaFactory>>,
        context_factory: Option<Arc<dyn ContextFactory>>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        let configuration = configuration.unwrap_or_default();
        let store = configuration.persisted_queries.enabled.then(|| {
            persisted_query_store.unwrap_or_else(|| {
                Arc::new(InMemoryPersistedQueryStore::new(
                    configuration.persisted_queries.cache.capacity,
                ))
            })
        });

        let allowed_headers = AllowedHeaders::new(&configuration.headers);
        let plugins = (!allowed_headers.is_noop())
            .then(|| Arc::new(allowed_headers) as Arc<dyn Plugin>)
            .into_iter()
            .chain(plugins)
            .collect();

        Self {
            execution: ExecutionService::new(
                engine,
                DocumentCache::new(&configuration.parser_cache),
                schema_factory,
                context_factory,
                configuration.masked_errors.clone(),
            ),
            apq: APQLayer::new(store),
            plugins,
            configuration,
            in_flight: SideTable::new(),
        }
    }
}

impl RouterService {
    pub fn boxed(self) -> router::BoxService {
        tower::util::BoxService::new(self)
    }

    pub fn boxed_clone(self) -> router::BoxCloneService {
        tower::util::BoxCloneService::new(self)
    }

    /// Abort every request in flight, streams included.
    pub fn shutdown(&self) {
        tracing::debug!(in_flight = self.in_flight.len(), "aborting requests in flight");
        self.in_flight.for_each(CancellationToken::cancel);
    }

    /// Number of requests currently being served, streams included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn call_inner(self, request: router::Request) -> router::ServiceResult {
        let router::Request {
            router_request,
            context,
        } = request;
        let (mut parts, body) = router_request.into_parts();

        let signal = CancellationToken::new();
        let abort_on_drop = signal.clone().drop_guard();
        let entry = self.in_flight.insert(context.id(), signal.clone());

        let outcome = match plugin::on_request(&self.plugins, &mut parts, &context).await {
            Ok(ControlFlow::Break(response)) => {
                abort_on_drop.disarm();
                return Ok(self.finish(response, context));
            }
            Ok(ControlFlow::Continue(())) => {
                let parts = Arc::new(parts);
                let outcome = self.process(&parts, body, &context, &signal).await;
                (outcome, parts)
            }
            Err(error) => (Err(error), Arc::new(parts)),
        };
        let (outcome, parts) = outcome;

        let payload = match outcome {
            Ok(Payload::Stream(stream)) => {
                let cancel = signal.clone();
                Payload::Stream(
                    stream
                        .with_cancel_hook(move || cancel.cancel())
                        .map_responses(move |response| {
                            let _in_flight = &entry;
                            response
                        }),
                )
            }
            Ok(payload) => payload,
            Err(error) => {
                let errors = classify(error, &self.configuration.masked_errors);
                if errors.is_empty() {
                    return Err(Box::new(Aborted));
                }
                Payload::Single(graphql::Response::from_errors(errors))
            }
        };
        abort_on_drop.disarm();

        let heartbeat = self.configuration.subscriptions.heartbeat();
        let response = match negotiate(&parts.headers, payload.is_stream()) {
            Negotiation::Accepted(media_type) => {
                protocols::build_response(payload, media_type, heartbeat)?
            }
            Negotiation::SubscriptionsNotSupported => match negotiate(&parts.headers, false) {
                Negotiation::Accepted(media_type) => {
                    protocols::build_response(payload, media_type, None)?
                }
                _ => protocols::not_acceptable(&[]),
            },
            Negotiation::NotAcceptable(acceptable) => {
                drop(payload);
                protocols::not_acceptable(acceptable)
            }
        };
        Ok(self.finish(response, context))
    }

    fn finish(&self, response: http::Response<Body>, context: Context) -> router::Response {
        let (mut parts, body) = response.into_parts();
        plugin::on_response(&self.plugins, &mut parts, &context);
        router::Response {
            response: http::Response::from_parts(parts, body),
            context,
        }
    }

    /// Extract the parameters of a request and execute them, one by one for batches.
    async fn process(
        &self,
        parts: &Arc<Parts>,
        body: Body,
        context: &Context,
        signal: &CancellationToken,
    ) -> Result<Payload, BoxError> {
        let bytes = body::into_bytes(body)
            .await
            .map_err(|_| RequestError::MalformedBody)?;
        let (params, mut is_batch) = match RequestEncoding::for_request(parts)?.parse(parts, &bytes)?
        {
            ExtractedParams::Single(params) => (vec![params], false),
            ExtractedParams::Batch(_) if !self.configuration.batching.enabled => {
                return Err(RequestError::BatchingNotSupported.into());
            }
            ExtractedParams::Batch(batch) => (batch, true),
        };

        let params = if self.configuration.batching.enabled {
            is_batch |= params.iter().any(has_batched_variables);
            let params: Vec<Value> = params
                .into_iter()
                .flat_map(expand_batched_variables)
                .collect();
            if let Some(maximum_size) = self.configuration.batching.maximum_size {
                if params.len() > maximum_size {
                    return Err(RequestError::BatchLimitExceeded(maximum_size).into());
                }
            }
            params
        } else {
            params
        };

        if !is_batch {
            let params = params.into_iter().next().unwrap_or(Value::Null);
            return match self
                .execute(params, parts.clone(), context.clone(), signal.clone())
                .await?
            {
                ExecutionResult::Single(response) => Ok(Payload::Single(response)),
                ExecutionResult::Stream(stream) => Ok(Payload::Stream(stream)),
            };
        }

        tracing::debug!(operations = params.len(), "executing batch");
        let executions = params.into_iter().map(|params| {
            self.execute(params, parts.clone(), Context::new(), signal.child_token())
        });
        let mut responses = Vec::new();
        for result in join_all(executions).await {
            let response = match result {
                Ok(ExecutionResult::Single(response)) => response,
                Ok(ExecutionResult::Stream(stream)) => {
                    drop(stream);
                    protocols::subscriptions_not_supported()
                }
                Err(error) => {
                    let errors = classify(error, &self.configuration.masked_errors);
                    if errors.is_empty() {
                        return Err(Box::new(Aborted));
                    }
                    graphql::Response::from_errors(errors)
                }
            };
            responses.push(response);
        }
        Ok(Payload::Batch(responses))
    }

    /// Run the parameters of one GraphQL request through validation, plugins, persisted
    /// queries and the engine.
    async fn execute(
        &self,
        params: Value,
        http_parts: Arc<Parts>,
        context: Context,
        signal: CancellationToken,
    ) -> Result<ExecutionResult, BoxError> {
        let mut graphql_request = check_params(params, &self.configuration.extra_params)?;
        plugin::on_params(&self.plugins, &mut graphql_request, &context).await?;
        self.apq.apq_request(&mut graphql_request, &context).await?;

        let execution::Response {
            mut result,
            context,
        } = self
            .execution
            .clone()
            .oneshot(
                execution::Request::builder()
                    .graphql_request(graphql_request)
                    .http_parts(http_parts)
                    .context(context)
                    .signal(signal)
                    .build(),
            )
            .await?;

        plugin::on_execution_result(&self.plugins, &mut result, &context).await?;
        Ok(result)
    }
}

fn has_batched_variables(params: &Value) -> bool {
    params
        .as_object()
        .and_then(|params| params.get("variables"))
        .is_some_and(Value::is_array)
}

impl Service<router::Request> for RouterService {
    type Response = router::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, router::ServiceResult>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: router::Request) -> Self::Future {
        let span = tracing::info_span!(
            "graphql_request",
            id = %request.context.id(),
            method = %request.router_request.method(),
        );
        let this = self.clone();
        Box::pin(this.call_inner(request).instrument(span))
    }
}
