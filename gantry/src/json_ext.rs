//! Performance oriented JSON manipulation.

use std::fmt;

use apollo_compiler::response::JsonMap;
use apollo_compiler::response::JsonValue;
use serde::Deserialize;
use serde::Serialize;
pub(crate) use serde_json::Map;
pub use serde_json::Value;
use serde_json_bytes::ByteString;

/// A JSON object.
pub type Object = Map<String, Value>;

/// The representation `apollo-compiler` expects for variables.
pub(crate) fn to_compiler_map(object: &Object) -> JsonMap {
    object
        .iter()
        .map(|(key, value)| (ByteString::from(key.as_str()), JsonValue::from(value.clone())))
        .collect()
}

pub(crate) fn from_compiler_map(map: JsonMap) -> Object {
    map.into_iter()
        .map(|(key, value)| (key.as_str().to_string(), from_compiler_value(value)))
        .collect()
}

pub(crate) fn from_compiler_value(value: JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(boolean) => Value::Bool(boolean),
        JsonValue::Number(number) => Value::Number(number),
        JsonValue::String(string) => Value::String(string.as_str().to_string()),
        JsonValue::Array(items) => {
            Value::Array(items.into_iter().map(from_compiler_value).collect())
        }
        JsonValue::Object(map) => Value::Object(from_compiler_map(map)),
    }
}

/// Extension trait for [`serde_json::Value`].
pub(crate) trait ValueExt {
    /// The name of the JSON type of this value, as reported in parameter errors.
    fn json_type_name(&self) -> &'static str;
}

impl ValueExt for Value {
    fn json_type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// A GraphQL path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_string())
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

/// A path into the result document.
///
/// This can be composed of strings and numbers.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    /// Returns a new path with `element` appended.
    pub fn join(&self, element: impl Into<PathElement>) -> Self {
        let mut elements = self.0.clone();
        elements.push(element.into());
        Path(elements)
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}
