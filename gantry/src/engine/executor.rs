//! A resolver based GraphQL execution engine.
//!
//! Fields are resolved by async functions registered per `Type.field`. Fields without a
//! resolver read the property of the same name on their parent value, so a static root
//! value is enough to serve a schema.
//!
//! Variable and argument coercion, field collection and value completion are left to
//! [`apollo_compiler::resolvers`]. Its executions are not `Send`: each one is driven to
//! completion on the blocking pool, with the runtime entered so resolvers can still use it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::executable::Operation;
use apollo_compiler::request::coerce_variable_values;
use apollo_compiler::resolvers;
use apollo_compiler::resolvers::AsyncObjectValue;
use apollo_compiler::resolvers::AsyncResolvedValue;
use apollo_compiler::resolvers::Execution;
use apollo_compiler::resolvers::FieldError;
use apollo_compiler::response::ExecutionResponse;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::response::JsonMap;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use futures::FutureExt;
use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use super::Engine;
use super::ExecutionArgs;
use super::ExecutionResult;
use crate::context::Context;
use crate::error::Aborted;
use crate::error::RequestError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::from_compiler_map;
use crate::json_ext::to_compiler_map;

type FieldResolver = Arc<dyn Fn(ResolveInfo) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

type EventStream = BoxStream<'static, Result<Value, BoxError>>;

type SubscriptionResolver =
    Arc<dyn Fn(ResolveInfo) -> BoxFuture<'static, Result<EventStream, BoxError>> + Send + Sync>;

/// Prefix the compiler puts in front of the message of a [`FieldError`].
const RESOLVER_ERROR_PREFIX: &str = "resolver error: ";

/// What a resolver knows about the field it resolves.
#[derive(Clone, Debug)]
pub struct ResolveInfo {
    parent: Arc<Value>,
    parent_type: String,
    field_name: String,
    arguments: Object,
    path: Path,
    context: Context,
    signal: CancellationToken,
}

impl ResolveInfo {
    /// The value of the object this field belongs to.
    pub fn parent(&self) -> &Value {
        &self.parent
    }

    pub fn parent_type(&self) -> &str {
        &self.parent_type
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Arguments of the field, with variables and default values applied.
    pub fn arguments(&self) -> &Object {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Cancelled once the result of the request is no longer wanted.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }
}

#[derive(Clone)]
struct Resolvers {
    schema: Arc<Valid<Schema>>,
    root_value: Arc<Value>,
    fields: HashMap<String, FieldResolver>,
    subscriptions: HashMap<String, SubscriptionResolver>,
}

/// An [`Engine`] executing operations with registered resolvers.
///
/// Operations run against the schema of their [`ExecutionArgs`], so one engine can serve
/// several schemas as long as the resolvers it holds make sense for each of them.
#[derive(Clone)]
pub struct ResolverEngine {
    resolvers: Arc<Resolvers>,
}

impl ResolverEngine {
    pub fn new(schema: Arc<Valid<Schema>>) -> Self {
        Self {
            resolvers: Arc::new(Resolvers {
                schema,
                root_value: Arc::new(Value::Object(Object::new())),
                fields: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    /// The parent value of root fields.
    pub fn with_root_value(mut self, root_value: Value) -> Self {
        self.resolvers_mut().root_value = Arc::new(root_value);
        self
    }

    /// Register the resolver of a field, named `Type.field`.
    pub fn with_resolver<F, Fut>(mut self, coordinate: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(ResolveInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let resolver: FieldResolver = Arc::new(move |info| resolver(info).boxed());
        self.resolvers_mut()
            .fields
            .insert(coordinate.into(), resolver);
        self
    }

    /// Register the source of events of a subscription field, named `Subscription.field`.
    ///
    /// Every event is then completed against the selection set of the field.
    pub fn with_subscription<F, Fut, S>(mut self, coordinate: impl Into<String>, source: F) -> Self
    where
        F: Fn(ResolveInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
        S: Stream<Item = Result<Value, BoxError>> + Send + 'static,
    {
        let source: SubscriptionResolver = Arc::new(move |info| {
            source(info)
                .map(|events| events.map(|events| events.boxed()))
                .boxed()
        });
        self.resolvers_mut()
            .subscriptions
            .insert(coordinate.into(), source);
        self
    }

    fn resolvers_mut(&mut self) -> &mut Resolvers {
        Arc::make_mut(&mut self.resolvers)
    }
}

impl std::fmt::Debug for ResolverEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverEngine")
            .field("resolvers", &self.resolvers.fields.keys().collect::<Vec<_>>())
            .field(
                "subscriptions",
                &self.resolvers.subscriptions.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait::async_trait]
impl Engine for ResolverEngine {
    fn schema(&self) -> Arc<Valid<Schema>> {
        self.resolvers.schema.clone()
    }

    async fn execute(&self, args: ExecutionArgs) -> Result<ExecutionResult, BoxError> {
        let resolvers = self.resolvers.clone();
        let signal = args.signal.clone();
        on_blocking_pool(signal, move || execute_operation(resolvers, args))
            .await
            .map(ExecutionResult::from)
    }

    async fn subscribe(&self, args: ExecutionArgs) -> Result<ExecutionResult, BoxError> {
        let resolvers = self.resolvers.clone();
        let signal = args.signal.clone();
        on_blocking_pool(signal, move || create_source_stream(resolvers, args)).await
    }
}

/// Drive an execution on the blocking pool until it completes or `signal` is cancelled.
async fn on_blocking_pool<F, Fut, T>(signal: CancellationToken, execution: F) -> Result<T, BoxError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BoxError>>,
    T: Send + 'static,
{
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || {
        handle.block_on(async move {
            tokio::select! {
                biased;
                _ = signal.cancelled() => Err(Box::new(Aborted) as BoxError),
                result = execution() => result,
            }
        })
    })
    .await?
}

async fn execute_operation(
    resolvers: Arc<Resolvers>,
    args: ExecutionArgs,
) -> Result<graphql::Response, BoxError> {
    let operation = select_operation(&args.document, args.operation_name.as_deref())?;
    let variables = match coerce_variables(&args, operation) {
        Ok(variables) => variables,
        Err(response) => return Ok(response),
    };
    let run = Run::new(resolvers, &args);
    let root = ObjectNode {
        run: &run,
        type_name: operation.object_type().to_string(),
        value: run.resolvers.root_value.clone(),
        path: Path::empty(),
    };
    let response = execution(&args, operation, &variables)
        .execute_async(&root)
        .await;
    drop(root);
    match response {
        Ok(response) => run.into_response(response),
        Err(error) => Ok(invalid_request(error, &args.document)),
    }
}

/// Resolve the event source of a subscription, then complete every event it yields as the
/// value of the subscription field.
async fn create_source_stream(
    resolvers: Arc<Resolvers>,
    args: ExecutionArgs,
) -> Result<ExecutionResult, BoxError> {
    let operation = select_operation(&args.document, args.operation_name.as_deref())?;
    let variables = match coerce_variables(&args, operation) {
        Ok(variables) => variables,
        Err(response) => return Ok(response.into()),
    };
    let run = Run::new(resolvers.clone(), &args);
    let source = EventSource {
        run: &run,
        type_name: operation.object_type().to_string(),
        events: Mutex::new(None),
    };
    let response = execution(&args, operation, &variables)
        .execute_async(&source)
        .await;
    let response = match response {
        Ok(response) => response,
        Err(error) => return Ok(invalid_request(error, &args.document).into()),
    };
    let events = source.events.lock().take();
    drop(source);
    let response = run.into_response(response)?;
    let Some(events) = events else {
        // no data alongside errors raised before the stream exists
        if response.errors.is_empty() {
            return Ok(response.into());
        }
        return Ok(graphql::Response::from_errors(response.errors).into());
    };

    let args = Arc::new(args);
    let variables = Arc::new(variables);
    let until_cancelled = {
        let signal = args.signal.clone();
        async move { signal.cancelled().await }
    };
    let responses = events
        .take_until(until_cancelled)
        .then(move |event| {
            let resolvers = resolvers.clone();
            let args = args.clone();
            let variables = variables.clone();
            let signal = args.signal.clone();
            on_blocking_pool(signal, move || async move {
                map_source_event(resolvers, &args, &variables, event).await
            })
        })
        .filter_map(|response| async move {
            match response {
                Ok(response) => Some(response),
                Err(error) if error.is::<Aborted>() => None,
                Err(error) => {
                    tracing::error!(%error, "could not complete a subscription event");
                    None
                }
            }
        });
    Ok(graphql::ResultStream::new(responses).into())
}

async fn map_source_event(
    resolvers: Arc<Resolvers>,
    args: &ExecutionArgs,
    variables: &Valid<JsonMap>,
    event: Result<Value, BoxError>,
) -> Result<graphql::Response, BoxError> {
    let operation = select_operation(&args.document, args.operation_name.as_deref())?;
    let run = Run::new(resolvers, args);
    let root = EventRoot {
        run: &run,
        type_name: operation.object_type().to_string(),
        event: Mutex::new(Some(event)),
    };
    let response = execution(args, operation, variables)
        .execute_async(&root)
        .await;
    drop(root);
    match response {
        Ok(response) => run.into_response(response),
        Err(error) => Ok(invalid_request(error, &args.document)),
    }
}

fn execution<'a>(
    args: &'a ExecutionArgs,
    operation: &'a Operation,
    variables: &'a Valid<JsonMap>,
) -> Execution<'a> {
    Execution::new(&args.schema, &args.document)
        .operation(operation)
        .coerced_variable_values(variables)
        .enable_schema_introspection(true)
}

fn coerce_variables(
    args: &ExecutionArgs,
    operation: &Operation,
) -> Result<Valid<JsonMap>, graphql::Response> {
    coerce_variable_values(&args.schema, operation, &to_compiler_map(&args.variables))
        .map_err(|error| invalid_request(error, &args.document))
}

/// An errors-only response for a request the compiler refused to execute, such as one with
/// variables that do not fit their declared type. Asks for a `400` like other malformed
/// requests.
fn invalid_request(
    error: apollo_compiler::request::RequestError,
    document: &ExecutableDocument,
) -> graphql::Response {
    let mut error: graphql::Error = error.to_graphql_error(&document.sources).into();
    graphql::HttpExtension {
        status: Some(400),
        spec: Some(true),
        ..Default::default()
    }
    .merge_into(&mut error.extensions);
    graphql::Response::from_errors(vec![error])
}

/// Pick the operation to run from a document.
pub(crate) fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a Node<Operation>, RequestError> {
    match operation_name {
        Some(name) => document.operations.get(Some(name)).map_err(|_| {
            if document.operations.iter().count() == 1 {
                RequestError::OperationNameMismatch(name.to_string())
            } else {
                RequestError::UnknownOperation(name.to_string())
            }
        }),
        None => document
            .operations
            .get(None)
            .map_err(|_| RequestError::AmbiguousOperation),
    }
}

/// State shared by the objects of one execution.
///
/// The compiler only keeps the message of a [`FieldError`], so resolver failures are set
/// aside here and their index travels as the message instead.
struct Run {
    resolvers: Arc<Resolvers>,
    schema: Arc<Valid<Schema>>,
    context: Context,
    signal: CancellationToken,
    failures: Mutex<Vec<BoxError>>,
    aborted: AtomicBool,
}

impl Run {
    fn new(resolvers: Arc<Resolvers>, args: &ExecutionArgs) -> Self {
        Self {
            resolvers,
            schema: args.schema.clone(),
            context: args.context.clone(),
            signal: args.signal.clone(),
            failures: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
        }
    }

    fn fail(&self, error: BoxError) -> FieldError {
        let mut failures = self.failures.lock();
        failures.push(error);
        FieldError {
            message: (failures.len() - 1).to_string(),
        }
    }

    fn ensure_not_cancelled(&self) -> Result<(), FieldError> {
        if self.signal.is_cancelled() {
            self.aborted.store(true, Ordering::SeqCst);
            return Err(FieldError {
                message: Aborted.to_string(),
            });
        }
        Ok(())
    }

    fn resolve_info(
        &self,
        parent: Arc<Value>,
        parent_type: &str,
        info: &resolvers::ResolveInfo<'_>,
        path: Path,
    ) -> ResolveInfo {
        ResolveInfo {
            parent,
            parent_type: parent_type.to_string(),
            field_name: info.field_name().to_string(),
            arguments: from_compiler_map(info.arguments().clone()),
            path,
            context: self.context.clone(),
            signal: self.signal.clone(),
        }
    }

    /// Hand a resolved value over to the compiler, to be completed as a `ty`.
    fn complete<'r>(
        &'r self,
        ty: &Type,
        value: Value,
        path: &Path,
    ) -> Result<AsyncResolvedValue<'r>, FieldError> {
        Ok(match value {
            Value::Null => AsyncResolvedValue::null(),
            Value::Array(items) if ty.is_list() => {
                let item_type = ty.item_type();
                let items: Vec<_> = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| self.complete(item_type, item, &path.join(index)))
                    .collect();
                AsyncResolvedValue::List(futures::stream::iter(items).boxed())
            }
            Value::Object(_) => match self.object_type(ty.inner_named_type(), &value)? {
                Some(type_name) => AsyncResolvedValue::object(ObjectNode {
                    run: self,
                    type_name,
                    value: Arc::new(value),
                    path: path.clone(),
                }),
                None => AsyncResolvedValue::leaf(value),
            },
            // IDs serialize as strings
            Value::Number(number) if ty.inner_named_type().as_str() == "ID" => {
                AsyncResolvedValue::leaf(number.to_string())
            }
            value => AsyncResolvedValue::leaf(value),
        })
    }

    /// The object type an object value completes as, if `name` is a composite type.
    fn object_type(&self, name: &str, value: &Value) -> Result<Option<String>, FieldError> {
        match self.schema.types.get(name) {
            Some(ExtendedType::Object(_)) => Ok(Some(name.to_string())),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                match value.get("__typename").and_then(Value::as_str) {
                    Some(concrete) => Ok(Some(concrete.to_string())),
                    None => Err(self.fail(
                        graphql::Error::builder()
                            .message(format!(
                                "Abstract type \"{name}\" must resolve to an Object type at runtime. The value should carry a \"__typename\"."
                            ))
                            .build()
                            .into(),
                    )),
                }
            }
            _ => Ok(None),
        }
    }

    fn into_response(self, response: ExecutionResponse) -> Result<graphql::Response, BoxError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Box::new(Aborted));
        }
        let mut failures: Vec<_> = self.failures.into_inner().into_iter().map(Some).collect();
        let errors = response
            .errors
            .into_iter()
            .map(|error| {
                let failure = error
                    .message
                    .strip_prefix(RESOLVER_ERROR_PREFIX)
                    .and_then(|index| index.parse::<usize>().ok())
                    .and_then(|index| failures.get_mut(index))
                    .and_then(Option::take);
                match failure {
                    Some(failure) => resolver_error(failure, error),
                    None => error.into(),
                }
            })
            .collect();
        Ok(graphql::Response::builder()
            .data(
                response
                    .data
                    .map(|data| Value::Object(from_compiler_map(data)))
                    .unwrap_or(Value::Null),
            )
            .errors(errors)
            .build())
    }
}

/// The GraphQL error of a failed resolver, at the place the compiler reported it.
fn resolver_error(failure: BoxError, reported: GraphQLError) -> graphql::Error {
    let reported = graphql::Error::from(reported);
    let path = reported.path.unwrap_or_default();
    match failure.downcast::<graphql::Error>() {
        Ok(error) => error.located_at(&path, &reported.locations),
        Err(error) => graphql::Error::builder()
            .message(error.to_string())
            .build()
            .with_boxed_original_error(error)
            .located_at(&path, &reported.locations),
    }
}

/// An object value whose fields are resolved by the registered resolvers, or else read from
/// the value itself.
struct ObjectNode<'r> {
    run: &'r Run,
    type_name: String,
    value: Arc<Value>,
    path: Path,
}

impl AsyncObjectValue for ObjectNode<'_> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a resolvers::ResolveInfo<'a>,
    ) -> BoxFuture<'a, Result<AsyncResolvedValue<'a>, FieldError>> {
        Box::pin(async move {
            let run: &'a Run = self.run;
            run.ensure_not_cancelled()?;
            let path = self
                .path
                .join(info.field_selections()[0].response_key().as_str());
            let coordinate = format!("{}.{}", self.type_name, info.field_name());
            let value = match run.resolvers.fields.get(&coordinate) {
                Some(resolver) => {
                    let info =
                        run.resolve_info(self.value.clone(), &self.type_name, info, path.clone());
                    resolver(info).await.map_err(|error| run.fail(error))?
                }
                None => self
                    .value
                    .get(info.field_name())
                    .cloned()
                    .unwrap_or(Value::Null),
            };
            run.complete(&info.field_definition().ty, value, &path)
        })
    }
}

/// Root of a subscription operation: keeps the event stream of the subscription field
/// instead of completing it.
struct EventSource<'r> {
    run: &'r Run,
    type_name: String,
    events: Mutex<Option<EventStream>>,
}

impl AsyncObjectValue for EventSource<'_> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a resolvers::ResolveInfo<'a>,
    ) -> BoxFuture<'a, Result<AsyncResolvedValue<'a>, FieldError>> {
        Box::pin(async move {
            let run = self.run;
            run.ensure_not_cancelled()?;
            let coordinate = format!("{}.{}", self.type_name, info.field_name());
            let Some(source) = run.resolvers.subscriptions.get(&coordinate) else {
                return Err(run.fail(
                    graphql::Error::builder()
                        .message(format!("Subscription field \"{coordinate}\" has no event source."))
                        .build()
                        .into(),
                ));
            };
            let path = Path::empty().join(info.field_selections()[0].response_key().as_str());
            let info = run.resolve_info(run.resolvers.root_value.clone(), &self.type_name, info, path);
            let events = source(info).await.map_err(|error| run.fail(error))?;
            *self.events.lock() = Some(events);
            Ok(AsyncResolvedValue::SkipForPartialExecution)
        })
    }
}

/// Root of a subscription operation for one event, which stands as the value of the
/// subscription field.
struct EventRoot<'r> {
    run: &'r Run,
    type_name: String,
    event: Mutex<Option<Result<Value, BoxError>>>,
}

impl AsyncObjectValue for EventRoot<'_> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a resolvers::ResolveInfo<'a>,
    ) -> BoxFuture<'a, Result<AsyncResolvedValue<'a>, FieldError>> {
        Box::pin(async move {
            let run: &'a Run = self.run;
            run.ensure_not_cancelled()?;
            let path = Path::empty().join(info.field_selections()[0].response_key().as_str());
            let event = self.event.lock().take().unwrap_or(Ok(Value::Null));
            let value = event.map_err(|error| run.fail(error))?;
            run.complete(&info.field_definition().ty, value, &path)
        })
    }
}
