//!  (A)utomatic (P)ersisted (Q)ueries.
//!
//!  A client may send the SHA-256 hash of a query instead of the query itself. The query is
//!  registered the first time it is sent along with its hash.
//!
//!  For more information on APQ see:
//!  <https://www.apollographql.com/docs/apollo-server/performance/apq/>

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;
use tower::BoxError;

use crate::Context;
use crate::cache::InMemoryStorage;
use crate::error::RequestError;
use crate::graphql;

const PERSISTED_QUERY_EXTENSION: &str = "persistedQuery";
const APQ_VERSION: u8 = 1;
pub(crate) const PERSISTED_QUERY_HIT: &str = "persisted_query_hit";

/// Where persisted queries are kept, keyed by the hex encoded SHA-256 hash of their text.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PersistedQueryStore: Send + Sync + 'static {
    async fn get(&self, hash: &str) -> Result<Option<String>, BoxError>;

    async fn set(&self, hash: &str, query: &str) -> Result<(), BoxError>;
}

/// A [`PersistedQueryStore`] keeping the most recently used queries in memory.
#[derive(Clone, Debug)]
pub struct InMemoryPersistedQueryStore {
    storage: InMemoryStorage<String, String>,
}

impl InMemoryPersistedQueryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            storage: InMemoryStorage::new(capacity),
        }
    }
}

#[async_trait::async_trait]
impl PersistedQueryStore for InMemoryPersistedQueryStore {
    async fn get(&self, hash: &str) -> Result<Option<String>, BoxError> {
        Ok(self.storage.get(&format!("apq|{hash}")))
    }

    async fn set(&self, hash: &str, query: &str) -> Result<(), BoxError> {
        self.storage.insert(format!("apq|{hash}"), query.to_string());
        Ok(())
    }
}

/// A persisted query.
#[derive(Deserialize, Clone, Debug)]
struct PersistedQuery {
    version: u8,
    #[serde(rename = "sha256Hash")]
    sha256hash: String,
}

/// Resolves persisted queries against a store. Without a store, requests carrying only a
/// hash are rejected as not supported.
#[derive(Clone)]
pub(crate) struct APQLayer {
    store: Option<Arc<dyn PersistedQueryStore>>,
}

impl APQLayer {
    pub(crate) fn new(store: Option<Arc<dyn PersistedQueryStore>>) -> Self {
        Self { store }
    }

    /// Install the stored query text in `request`, or register the query it carries.
    pub(crate) async fn apq_request(
        &self,
        request: &mut graphql::Request,
        context: &Context,
    ) -> Result<(), BoxError> {
        let Some(extension) = request.extensions.get(PERSISTED_QUERY_EXTENSION) else {
            return Ok(());
        };
        let persisted_query = serde_json::from_value::<PersistedQuery>(extension.clone())
            .ok()
            .filter(|persisted_query| persisted_query.version == APQ_VERSION)
            .ok_or(RequestError::PersistedQueryKeyNotFound)?;

        match (&self.store, request.query.as_deref()) {
            (Some(store), Some(query)) => {
                let matches = hex::decode(persisted_query.sha256hash.as_bytes())
                    .is_ok_and(|hash| query_matches_hash(query, &hash));
                if !matches {
                    tracing::trace!("apq: graphql request doesn't match provided sha256Hash");
                    return Err(RequestError::PersistedQueryInvalidHash.into());
                }
                tracing::trace!("apq: cache insert");
                let _ = context.insert(PERSISTED_QUERY_HIT, false);
                store.set(&persisted_query.sha256hash, query).await?;
                Ok(())
            }
            (Some(store), None) => match store.get(&persisted_query.sha256hash).await? {
                Some(cached_query) => {
                    tracing::trace!("apq: cache hit");
                    let _ = context.insert(PERSISTED_QUERY_HIT, true);
                    request.query = Some(cached_query);
                    Ok(())
                }
                None => {
                    tracing::trace!("apq: cache miss");
                    Err(RequestError::PersistedQueryNotFound.into())
                }
            },
            (None, Some(_)) => Ok(()),
            (None, None) => Err(RequestError::PersistedQueryNotSupported.into()),
        }
    }
}

fn query_matches_hash(query: &str, hash: &[u8]) -> bool {
    let mut digest = Sha256::new();
    digest.update(query.as_bytes());
    hash == digest.finalize().as_slice()
}

/// The hex encoded SHA-256 hash of a query, as sent by clients.
pub fn query_hash(query: &str) -> String {
    hex::encode(Sha256::digest(query.as_bytes()))
}
