//! Cache of parsing and validation results, keyed by query source and schema.

use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;

use crate::cache::InMemoryStorage;
use crate::configuration::ParserCache;
use crate::engine::Engine;
use crate::error::DocumentErrors;

type Parsed = Result<Arc<ast::Document>, DocumentErrors>;
type Validated = Result<Arc<Valid<ExecutableDocument>>, DocumentErrors>;

/// Parses and validates queries through an [`Engine`], reusing earlier outcomes for
/// identical sources. Failures are cached as well.
///
/// Parsing does not depend on the schema, validation is cached per schema instance.
#[derive(Clone, Debug)]
pub(crate) struct DocumentCache {
    storage: Option<Storage>,
}

#[derive(Clone, Debug)]
struct Storage {
    parsed: InMemoryStorage<String, Parsed>,
    validated: InMemoryStorage<(SchemaKey, String), (Arc<Valid<Schema>>, Validated)>,
}

/// Address of a schema. Unique among cached entries, which keep their schema alive.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct SchemaKey(usize);

impl SchemaKey {
    fn of(schema: &Arc<Valid<Schema>>) -> Self {
        Self(Arc::as_ptr(schema) as usize)
    }
}

impl DocumentCache {
    pub(crate) fn new(configuration: &ParserCache) -> Self {
        let storage = configuration.enabled.then(|| Storage {
            parsed: InMemoryStorage::new(configuration.capacity),
            validated: InMemoryStorage::new(configuration.capacity),
        });
        Self { storage }
    }

    pub(crate) fn parse_and_validate(
        &self,
        engine: &dyn Engine,
        schema: &Arc<Valid<Schema>>,
        query: &str,
    ) -> Validated {
        let Some(storage) = &self.storage else {
            let document = engine.parse(query)?;
            return engine.validate(schema, &document).map(Arc::new);
        };

        let key = (SchemaKey::of(schema), query.to_string());
        if let Some((_, validated)) = storage.validated.get(&key) {
            tracing::debug!("document cache hit");
            return validated;
        }

        let parsed = match storage.parsed.get(&query.to_string()) {
            Some(parsed) => parsed,
            None => {
                let parsed = engine.parse(query).map(Arc::new);
                storage.parsed.insert(query.to_string(), parsed.clone());
                parsed
            }
        };
        let validated = engine.validate(schema, &*parsed?).map(Arc::new);
        storage
            .validated
            .insert(key, (schema.clone(), validated.clone()));
        validated
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use apollo_compiler::Schema;
    use test_log::test;
    use tower::BoxError;

    use super::*;
    use crate::engine::ExecutionArgs;
    use crate::engine::ExecutionResult;
    use crate::error::DocumentPhase;

    #[derive(Default)]
    struct CountingEngine {
        parsed: AtomicUsize,
        validated: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Engine for CountingEngine {
        fn schema(&self) -> Arc<Valid<Schema>> {
            Arc::new(
                Schema::parse_and_validate("type Query { ping: String }", "schema.graphql")
                    .unwrap(),
            )
        }

        fn parse(&self, query: &str) -> Result<ast::Document, DocumentErrors> {
            self.parsed.fetch_add(1, Ordering::SeqCst);
            ast::Document::parse(query, "query.graphql").map_err(|with_errors| {
                DocumentErrors::from_diagnostics(DocumentPhase::Parse, &with_errors.errors)
            })
        }

        fn validate(
            &self,
            schema: &Valid<Schema>,
            document: &ast::Document,
        ) -> Result<Valid<ExecutableDocument>, DocumentErrors> {
            self.validated.fetch_add(1, Ordering::SeqCst);
            document
                .to_executable_validate(schema)
                .map_err(|with_errors| {
                    DocumentErrors::from_diagnostics(DocumentPhase::Validation, &with_errors.errors)
                })
        }

        async fn execute(&self, _args: ExecutionArgs) -> Result<ExecutionResult, BoxError> {
            Err("unused".into())
        }

        async fn subscribe(&self, _args: ExecutionArgs) -> Result<ExecutionResult, BoxError> {
            Err("unused".into())
        }
    }

    fn enabled() -> ParserCache {
        ParserCache::builder()
            .capacity(NonZeroUsize::new(4).unwrap())
            .build()
    }

    #[test]
    fn identical_queries_are_parsed_and_validated_once() {
        let engine = CountingEngine::default();
        let schema = engine.schema();
        let cache = DocumentCache::new(&enabled());
        for _ in 0..3 {
            assert!(cache.parse_and_validate(&engine, &schema, "{ ping }").is_ok());
        }
        assert_eq!(engine.parsed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.validated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_cached() {
        let engine = CountingEngine::default();
        let schema = engine.schema();
        let cache = DocumentCache::new(&enabled());
        for _ in 0..2 {
            let errors = cache.parse_and_validate(&engine, &schema, "{ ping").unwrap_err();
            assert_eq!(errors.phase, DocumentPhase::Parse);
            let errors = cache.parse_and_validate(&engine, &schema, "{ pong }").unwrap_err();
            assert_eq!(errors.phase, DocumentPhase::Validation);
        }
        assert_eq!(engine.parsed.load(Ordering::SeqCst), 2);
        assert_eq!(engine.validated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn validation_is_cached_per_schema() {
        let engine = CountingEngine::default();
        let cache = DocumentCache::new(&enabled());
        let ping = engine.schema();
        let pong = Arc::new(
            Schema::parse_and_validate("type Query { pong: String }", "pong.graphql").unwrap(),
        );

        assert!(cache.parse_and_validate(&engine, &ping, "{ ping }").is_ok());
        let errors = cache
            .parse_and_validate(&engine, &pong, "{ ping }")
            .unwrap_err();
        assert_eq!(errors.phase, DocumentPhase::Validation);
        assert!(cache.parse_and_validate(&engine, &ping, "{ ping }").is_ok());

        assert_eq!(engine.parsed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.validated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabled_cache_always_delegates() {
        let engine = CountingEngine::default();
        let schema = engine.schema();
        let cache = DocumentCache::new(&ParserCache::builder().enabled(false).build());
        for _ in 0..2 {
            assert!(cache.parse_and_validate(&engine, &schema, "{ ping }").is_ok());
        }
        assert_eq!(engine.parsed.load(Ordering::SeqCst), 2);
        assert_eq!(engine.validated.load(Ordering::SeqCst), 2);
    }
}
