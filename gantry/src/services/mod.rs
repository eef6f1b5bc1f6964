//! Implementation of the various steps in the request lifecycle.

pub use self::layers::apq::InMemoryPersistedQueryStore;
pub use self::layers::apq::PersistedQueryStore;
pub use self::layers::apq::query_hash;
pub use self::layers::content_negotiation::NegotiatedMediaType;
pub use self::router::service::RouterService;

pub(crate) mod execution;
pub(crate) mod layers;
pub mod router;

pub type RouterRequest = router::Request;
pub type RouterResponse = router::Response;
