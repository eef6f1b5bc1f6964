//! The GraphQL engine the pipeline delegates parsing, validation and execution to.

pub mod executor;

use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

pub use self::executor::ResolveInfo;
pub use self::executor::ResolverEngine;
use crate::context::Context;
use crate::error::DocumentErrors;
use crate::error::DocumentPhase;
use crate::graphql;
use crate::json_ext::Object;

/// Name given to request documents in diagnostics.
const DOCUMENT_NAME: &str = "query.graphql";

/// Everything an engine needs to run one operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ExecutionArgs {
    pub schema: Arc<Valid<Schema>>,
    pub document: Arc<Valid<ExecutableDocument>>,
    pub operation_name: Option<String>,
    pub variables: Object,
    pub context: Context,
    /// Cancelled when the client goes away or the server shuts down.
    pub signal: CancellationToken,
}

/// What an engine produced for an operation.
#[derive(Debug)]
pub enum ExecutionResult {
    Single(graphql::Response),
    Stream(graphql::ResultStream),
}

impl ExecutionResult {
    pub fn is_stream(&self) -> bool {
        matches!(self, ExecutionResult::Stream(_))
    }
}

impl From<graphql::Response> for ExecutionResult {
    fn from(response: graphql::Response) -> Self {
        ExecutionResult::Single(response)
    }
}

impl From<graphql::ResultStream> for ExecutionResult {
    fn from(stream: graphql::ResultStream) -> Self {
        ExecutionResult::Stream(stream)
    }
}

/// A GraphQL engine.
///
/// Parsing and validation default to `apollo-compiler`. Documents are validated against the
/// schema of the request, which is [`Engine::schema`] unless a [`SchemaFactory`] picked
/// another one. Both `execute` and `subscribe` may return a single result or a stream;
/// subscription operations are sent to `subscribe`, every other operation to `execute`.
#[async_trait::async_trait]
pub trait Engine: Send + Sync + 'static {
    fn schema(&self) -> Arc<Valid<Schema>>;

    /// Syntax only: nothing is checked against the schema yet.
    fn parse(&self, query: &str) -> Result<ast::Document, DocumentErrors> {
        ast::Document::parse(query, DOCUMENT_NAME).map_err(|with_errors| {
            DocumentErrors::from_diagnostics(DocumentPhase::Parse, &with_errors.errors)
        })
    }

    fn validate(
        &self,
        schema: &Valid<Schema>,
        document: &ast::Document,
    ) -> Result<Valid<ExecutableDocument>, DocumentErrors> {
        document
            .to_executable_validate(schema)
            .map_err(|with_errors| {
                DocumentErrors::from_diagnostics(DocumentPhase::Validation, &with_errors.errors)
            })
    }

    async fn execute(&self, args: ExecutionArgs) -> Result<ExecutionResult, BoxError>;

    async fn subscribe(&self, args: ExecutionArgs) -> Result<ExecutionResult, BoxError>;
}

/// Picks the schema a request is validated and executed against.
#[async_trait::async_trait]
pub trait SchemaFactory: Send + Sync + 'static {
    async fn schema(
        &self,
        request: &http::request::Parts,
        context: &Context,
    ) -> Result<Arc<Valid<Schema>>, BoxError>;
}
