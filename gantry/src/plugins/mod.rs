//! Plugins shipped with the server.

pub mod headers;
