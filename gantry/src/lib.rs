//! Gantry serves GraphQL over HTTP.
//!
//! A [`RouterService`] takes HTTP requests through parameter extraction, persisted queries,
//! parsing, validation and execution with an [`engine::Engine`], then answers in the
//! representation the client negotiated: a JSON document, `multipart/mixed` parts or server
//! sent events. [`plugin::Plugin`]s can intercept every phase of a request.

pub mod axum_factory;
mod cache;
pub mod configuration;
mod context;
pub mod engine;
pub mod error;
mod executable;
pub mod graphql;
pub mod json_ext;
pub mod plugin;
pub mod plugins;
mod protocols;
pub mod services;

pub use crate::configuration::Configuration;
pub use crate::context::Context;
pub use crate::context::ContextFactory;
pub use crate::context::SideTable;
pub use crate::context::SideTableGuard;
pub use crate::engine::SchemaFactory;
pub use crate::executable::Executable;
pub use crate::executable::main;
pub use crate::services::RouterService;
