//! The execution stage: from checked parameters to what the engine produced.

use std::sync::Arc;
use std::task::Poll;

use apollo_compiler::ast::OperationType;
use futures::future::BoxFuture;
use http::Method;
use static_assertions::assert_impl_all;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::Service;

use crate::Context;
use crate::configuration::MaskedErrors;
use crate::context::ContextFactory;
use crate::engine::Engine;
use crate::engine::ExecutionArgs;
use crate::engine::ExecutionResult;
use crate::engine::SchemaFactory;
use crate::engine::executor::select_operation;
use crate::error::Aborted;
use crate::error::RequestError;
use crate::error::normalize_error;
use crate::graphql;
use crate::services::layers::check_params::ensure_query;
use crate::services::layers::parser_cache::DocumentCache;

assert_impl_all!(Request: Send);
/// One GraphQL request, ready to be executed.
#[non_exhaustive]
pub(crate) struct Request {
    pub(crate) graphql_request: graphql::Request,
    pub(crate) http_parts: Arc<http::request::Parts>,
    pub(crate) context: Context,
    pub(crate) signal: CancellationToken,
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub(crate)")]
    fn new(
        graphql_request: graphql::Request,
        http_parts: Arc<http::request::Parts>,
        context: Context,
        signal: CancellationToken,
    ) -> Self {
        Self {
            graphql_request,
            http_parts,
            context,
            signal,
        }
    }
}

assert_impl_all!(Response: Send);
#[derive(Debug)]
pub(crate) struct Response {
    pub(crate) result: ExecutionResult,
    pub(crate) context: Context,
}

/// Parses, validates and runs operations with an [`Engine`].
///
/// Errors raised before the engine returns are handed back as is, to be classified by the
/// caller. Errors found in results are masked here.
#[derive(Clone)]
pub(crate) struct ExecutionService {
    engine: Arc<dyn Engine>,
    documents: DocumentCache,
    schema_factory: Option<Arc<dyn SchemaFactory>>,
    context_factory: Option<Arc<dyn ContextFactory>>,
    masking: MaskedErrors,
}

impl ExecutionService {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        documents: DocumentCache,
        schema_factory: Option<Arc<dyn SchemaFactory>>,
        context_factory: Option<Arc<dyn ContextFactory>>,
        masking: MaskedErrors,
    ) -> Self {
        Self {
            engine,
            documents,
            schema_factory,
            context_factory,
            masking,
        }
    }

    async fn execute(self, request: Request) -> Result<Response, BoxError> {
        let Request {
            graphql_request,
            http_parts,
            context,
            signal,
        } = request;

        let query = ensure_query(&graphql_request)?;
        let schema = match &self.schema_factory {
            Some(schema_factory) => schema_factory.schema(&http_parts, &context).await?,
            None => self.engine.schema(),
        };
        let document = self
            .documents
            .parse_and_validate(self.engine.as_ref(), &schema, query)?;
        let operation = select_operation(&document, graphql_request.operation_name.as_deref())?;
        if http_parts.method == Method::GET && operation.operation_type == OperationType::Mutation
        {
            return Err(RequestError::MutationOverGet.into());
        }
        let is_subscription = operation.operation_type == OperationType::Subscription;

        if let Some(context_factory) = &self.context_factory {
            context_factory.build(&http_parts, &context).await?;
        }

        let args = ExecutionArgs {
            schema,
            document: document.clone(),
            operation_name: graphql_request.operation_name,
            variables: graphql_request.variables,
            context: context.clone(),
            signal: signal.clone(),
        };
        let dispatch = async {
            if is_subscription {
                self.engine.subscribe(args).await
            } else {
                self.engine.execute(args).await
            }
        };
        let result = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(Box::new(Aborted)),
            result = dispatch => result?,
        };

        Ok(Response {
            result: self.mask(result),
            context,
        })
    }

    fn mask(&self, result: ExecutionResult) -> ExecutionResult {
        match result {
            ExecutionResult::Single(mut response) => {
                mask_response(&mut response, &self.masking);
                ExecutionResult::Single(response)
            }
            ExecutionResult::Stream(stream) => {
                let masking = self.masking.clone();
                ExecutionResult::Stream(stream.map_responses(move |mut response| {
                    mask_response(&mut response, &masking);
                    response
                }))
            }
        }
    }
}

fn mask_response(response: &mut graphql::Response, masking: &MaskedErrors) {
    response.errors = std::mem::take(&mut response.errors)
        .into_iter()
        .map(|error| normalize_error(error, masking))
        .collect();
}

impl Service<Request> for ExecutionService {
    type Response = Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let this = self.clone();
        Box::pin(this.execute(request))
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::validation::Valid;
    use apollo_compiler::Schema;
    use futures::StreamExt;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::configuration::ParserCache;
    use crate::error::DocumentErrors;
    use crate::error::DocumentPhase;
    use crate::engine::ResolveInfo;
    use crate::engine::ResolverEngine;
    use crate::json_ext::Value;

    const SCHEMA: &str = r#"
        type Query { ping: String, fail: String, slow: String }
        type Mutation { bump: Int }
        type Subscription { ticks: Int! }
    "#;

    fn engine() -> Arc<dyn Engine> {
        let schema: Arc<Valid<Schema>> =
            Arc::new(Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap());
        Arc::new(
            ResolverEngine::new(schema)
                .with_root_value(json!({ "ping": "pong", "bump": 1, "greeting": "hi" }))
                .with_resolver("Query.fail", |_info: ResolveInfo| async move {
                    Err::<Value, BoxError>("connection refused".into())
                })
                .with_resolver("Query.slow", |_info: ResolveInfo| async move {
                    futures::future::pending::<()>().await;
                    Ok::<_, BoxError>(Value::Null)
                })
                .with_resolver("Query.ping", |info: ResolveInfo| async move {
                    let user: Option<String> = info.context().get("user").unwrap_or_default();
                    Ok::<_, BoxError>(Value::from(user.unwrap_or_else(|| "pong".to_string())))
                })
                .with_subscription("Subscription.ticks", |_info: ResolveInfo| async move {
                    Ok::<_, BoxError>(futures::stream::iter(
                        [1, 2].map(|n| Ok::<_, BoxError>(Value::from(n))),
                    ))
                }),
        )
    }

    fn service(context_factory: Option<Arc<dyn ContextFactory>>) -> ExecutionService {
        ExecutionService::new(
            engine(),
            DocumentCache::new(&ParserCache::default()),
            None,
            context_factory,
            MaskedErrors::default(),
        )
    }

    fn request(method: Method, query: &str) -> Request {
        let http_parts = http::Request::builder()
            .method(method)
            .body(())
            .unwrap()
            .into_parts()
            .0;
        Request::builder()
            .graphql_request(graphql::Request::builder().query(query).build())
            .http_parts(Arc::new(http_parts))
            .context(Context::new())
            .signal(CancellationToken::new())
            .build()
    }

    fn single(response: Response) -> graphql::Response {
        match response.result {
            ExecutionResult::Single(response) => response,
            ExecutionResult::Stream(_) => panic!("expected a single result"),
        }
    }

    #[tokio::test]
    async fn queries_are_executed() {
        let response = service(None)
            .oneshot(request(Method::GET, "{ ping }"))
            .await
            .unwrap();
        assert_eq!(single(response).data, Some(json!({ "ping": "pong" })));
    }

    #[tokio::test]
    async fn mutations_are_rejected_over_get() {
        let error = service(None)
            .oneshot(request(Method::GET, "mutation { bump }"))
            .await
            .unwrap_err();
        assert_eq!(
            *error.downcast::<RequestError>().unwrap(),
            RequestError::MutationOverGet
        );
        assert!(
            service(None)
                .oneshot(request(Method::POST, "mutation { bump }"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn subscriptions_are_streamed() {
        let response = service(None)
            .oneshot(request(Method::POST, "subscription { ticks }"))
            .await
            .unwrap();
        let ExecutionResult::Stream(stream) = response.result else {
            panic!("expected a stream");
        };
        let data: Vec<_> = stream.map(|response| response.data).collect().await;
        assert_eq!(
            data,
            vec![Some(json!({ "ticks": 1 })), Some(json!({ "ticks": 2 }))]
        );
    }

    #[tokio::test]
    async fn unexpected_resolver_errors_are_masked() {
        let response = service(None)
            .oneshot(request(Method::POST, "{ fail }"))
            .await
            .unwrap();
        let response = single(response);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "Unexpected error.");
        assert!(response.errors[0].path.is_some());
    }

    #[tokio::test]
    async fn operation_must_be_determined() {
        let error = service(None)
            .oneshot(request(Method::POST, "query A { ping } query B { ping }"))
            .await
            .unwrap_err();
        assert_eq!(
            *error.downcast::<RequestError>().unwrap(),
            RequestError::AmbiguousOperation
        );
    }

    struct UserFactory;

    #[async_trait::async_trait]
    impl ContextFactory for UserFactory {
        async fn build(
            &self,
            request: &http::request::Parts,
            context: &Context,
        ) -> Result<(), BoxError> {
            match request.headers.get("x-user") {
                Some(user) => {
                    context.insert("user", user.to_str()?.to_string())?;
                    Ok(())
                }
                None => Err(graphql::Error::builder()
                    .message("unauthenticated")
                    .extension("http", json!({ "status": 401 }))
                    .build()
                    .into()),
            }
        }
    }

    #[tokio::test]
    async fn context_factory_feeds_resolvers() {
        let mut request = request(Method::POST, "{ ping }");
        let mut parts = Arc::try_unwrap(request.http_parts).unwrap();
        parts.headers.insert("x-user", "ada".parse().unwrap());
        request.http_parts = Arc::new(parts);
        let response = service(Some(Arc::new(UserFactory)))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(single(response).data, Some(json!({ "ping": "ada" })));

        let error = service(Some(Arc::new(UserFactory)))
            .oneshot(self::request(Method::POST, "{ ping }"))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "unauthenticated");
    }

    struct HeaderSchema {
        v1: Arc<Valid<Schema>>,
        v2: Arc<Valid<Schema>>,
    }

    #[async_trait::async_trait]
    impl SchemaFactory for HeaderSchema {
        async fn schema(
            &self,
            request: &http::request::Parts,
            _context: &Context,
        ) -> Result<Arc<Valid<Schema>>, BoxError> {
            match request.headers.get("x-schema") {
                Some(version) if version == "v2" => Ok(self.v2.clone()),
                _ => Ok(self.v1.clone()),
            }
        }
    }

    #[tokio::test]
    async fn schema_factory_picks_the_schema_of_each_request() {
        let schema_factory = HeaderSchema {
            v1: engine().schema(),
            v2: Arc::new(
                Schema::parse_and_validate(
                    "type Query { ping: String, greeting: String }",
                    "v2.graphql",
                )
                .unwrap(),
            ),
        };
        let service = ExecutionService::new(
            engine(),
            DocumentCache::new(&ParserCache::default()),
            Some(Arc::new(schema_factory)),
            None,
            MaskedErrors::default(),
        );

        let error = service
            .clone()
            .oneshot(request(Method::POST, "{ greeting }"))
            .await
            .unwrap_err();
        assert_eq!(
            error.downcast::<DocumentErrors>().unwrap().phase,
            DocumentPhase::Validation
        );

        let mut request = request(Method::POST, "{ greeting }");
        let mut parts = Arc::try_unwrap(request.http_parts).unwrap();
        parts.headers.insert("x-schema", "v2".parse().unwrap());
        request.http_parts = Arc::new(parts);
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(single(response).data, Some(json!({ "greeting": "hi" })));
    }

    #[tokio::test]
    async fn cancellation_aborts_execution() {
        let request = request(Method::POST, "{ slow }");
        let signal = request.signal.clone();
        let execution = tokio::spawn(service(None).oneshot(request));
        tokio::task::yield_now().await;
        signal.cancel();
        let error = execution.await.unwrap().unwrap_err();
        assert!(error.is::<Aborted>());
    }
}
