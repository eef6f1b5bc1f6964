//! The stages a GraphQL request goes through before it reaches the engine.

pub(crate) mod apq;
pub(crate) mod check_params;
pub(crate) mod content_negotiation;
pub(crate) mod parser_cache;
pub(crate) mod request_parser;
