use std::net::Ipv4Addr;
use std::net::SocketAddr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))
}

fn default_graphql_path() -> String {
    String::from("/graphql")
}

/// Where the GraphQL endpoint is exposed.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Server {
    /// Socket address to bind, `127.0.0.1:4000` unless set.
    #[schemars(with = "String", default = "default_listen")]
    pub(crate) listen: SocketAddr,

    /// Path of the GraphQL endpoint, `/graphql` unless set.
    pub(crate) graphql_path: String,
}

#[buildstructor::buildstructor]
impl Server {
    #[builder(visibility = "pub")]
    fn new(listen: Option<SocketAddr>, graphql_path: Option<String>) -> Self {
        Self {
            listen: listen.unwrap_or_else(default_listen),
            graphql_path: graphql_path.unwrap_or_else(default_graphql_path),
        }
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
    }

    pub fn graphql_path(&self) -> &str {
        &self.graphql_path
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::builder().build()
    }
}
