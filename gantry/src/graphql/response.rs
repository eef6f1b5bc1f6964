use serde::Deserialize;
use serde::Serialize;
use serde_json::Map as JsonMap;

use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// A GraphQL response, or one of the incremental payloads of a streamed result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The label that was passed to the defer or stream directive for this patch.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,

    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The path that the data should be merged at.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<Path>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,

    /// Set on incremental payloads; `false` on the last one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub has_next: Option<bool>,
}

#[buildstructor::buildstructor]
impl Response {
    #[builder(visibility = "pub")]
    fn new(
        label: Option<String>,
        data: Option<Value>,
        path: Option<Path>,
        errors: Vec<Error>,
        extensions: JsonMap<String, Value>,
        has_next: Option<bool>,
    ) -> Self {
        Self {
            label,
            data,
            path,
            errors,
            extensions,
            has_next,
        }
    }

    /// A response carrying only errors, as produced when a request fails before execution.
    ///
    /// There is no `data` entry at all in such a response.
    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graphql::Location;

    #[test]
    fn field_errors_round_trip() {
        let body = json!({
            "data": { "user": { "name": null } },
            "errors": [{
                "message": "name is private",
                "locations": [{ "line": 1, "column": 10 }],
                "path": ["user", "name"],
                "extensions": { "code": "FORBIDDEN" }
            }],
            "extensions": { "cost": 3 }
        });
        let response: Response = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(
            response,
            Response::builder()
                .data(json!({ "user": { "name": null } }))
                .error(
                    Error::builder()
                        .message("name is private")
                        .location(Location { line: 1, column: 10 })
                        .path(Path::from("user/name"))
                        .extension_code("FORBIDDEN")
                        .build()
                )
                .extension("cost", 3)
                .build()
        );
        assert_eq!(serde_json::to_value(&response).unwrap(), body);
    }

    #[test]
    fn errors_only_response_has_no_data_key() {
        let response = Response::from_errors(vec![
            Error::builder()
                .message("Subscriptions are not supported")
                .build(),
        ]);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"errors":[{"message":"Subscriptions are not supported"}]}"#
        );
    }

    #[test]
    fn null_data_is_kept() {
        let response = Response::builder().data(Value::Null).build();
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"data":null}"#);
    }

    #[test]
    fn last_patch() {
        let response = Response::builder().has_next(false).build();
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"hasNext":false}"#);
    }
}
