use serde::Deserialize;
use serde::Serialize;
use serde_json::Map as JsonMap;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// The parameters of one GraphQL request, once they have been checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Request {
    /// Document to execute. Only missing until a persisted query has been looked up.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,

    /// Which operation of the document to run. Required when it holds more than one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub variables: Object,

    /// Carries `persistedQuery` for automatic persisted queries, along with anything
    /// plugins care about.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub extensions: Object,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Object, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Object>::deserialize(deserializer)?.unwrap_or_default())
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // spelled out so that buildstructor generates `.variable(k, v)` and friends
        variables: JsonMap<String, Value>,
        extensions: JsonMap<String, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
        }
    }
}
