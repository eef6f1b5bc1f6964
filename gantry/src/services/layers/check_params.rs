//! Shape checks of the transport parameters.

use crate::error::RequestError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

const EXPECTED_PARAMETERS: [&str; 4] = ["query", "variables", "operationName", "extensions"];

/// Turn raw parameters into a [`graphql::Request`].
///
/// Keys set to `null` are treated as absent. The query may still be missing afterwards when it
/// is to be found in the persisted query store.
pub(crate) fn check_params(
    params: Value,
    extra_params: &[String],
) -> Result<graphql::Request, RequestError> {
    let mut params = match params {
        Value::Object(params) => params,
        Value::Null => return Err(RequestError::InvalidParams),
        other => return Err(RequestError::ParamsNotAnObject(other.json_type_name())),
    };

    if let Some((key, _)) = params.iter().find(|(key, value)| {
        !value.is_null()
            && !EXPECTED_PARAMETERS.contains(&key.as_str())
            && !extra_params.iter().any(|extra| extra == *key)
    }) {
        return Err(RequestError::UnexpectedParameter(key.clone()));
    }

    let query = match params.remove("query") {
        None | Some(Value::Null) => None,
        Some(Value::String(query)) => Some(query),
        Some(other) => return Err(RequestError::InvalidQueryParam(other.json_type_name())),
    };
    let variables = object_param(params.remove("variables"))
        .map_err(RequestError::InvalidVariablesParam)?;
    let extensions = object_param(params.remove("extensions"))
        .map_err(RequestError::InvalidExtensionsParam)?;
    let operation_name = match params.remove("operationName") {
        Some(Value::String(name)) if !name.is_empty() => Some(name),
        _ => None,
    };

    Ok(graphql::Request::builder()
        .and_query(query)
        .and_operation_name(operation_name)
        .variables(variables)
        .extensions(extensions)
        .build())
}

fn object_param(value: Option<Value>) -> Result<Object, &'static str> {
    match value {
        None | Some(Value::Null) => Ok(Object::new()),
        Some(Value::Object(object)) => Ok(object),
        Some(other) => Err(other.json_type_name()),
    }
}

/// The query to run, once persisted queries have been resolved.
pub(crate) fn ensure_query(request: &graphql::Request) -> Result<&str, RequestError> {
    request.query.as_deref().ok_or(RequestError::MissingQuery)
}

/// Expand parameters whose `variables` is an array into one set of parameters per entry.
pub(crate) fn expand_batched_variables(params: Value) -> Vec<Value> {
    match params {
        Value::Object(mut object) if object.get("variables").is_some_and(Value::is_array) => {
            let Some(Value::Array(batch)) = object.remove("variables") else {
                return vec![Value::Object(object)];
            };
            batch
                .into_iter()
                .map(|variables| {
                    let mut params = object.clone();
                    params.insert("variables".to_string(), variables);
                    Value::Object(params)
                })
                .collect()
        }
        params => vec![params],
    }
}
