//! Schema-agnostic message tree.
//!
//! A [`Message`] is the JSON object form of a protobuf message: field names
//! are the proto field names, 64-bit integers are numbers, bytes are base64
//! strings and well-known types use the protobuf JSON mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PointerError {
    #[error("JSON pointer must be empty or start with '/': {0}")]
    Malformed(String),
    #[error("JSON pointer {0} cannot address the message root")]
    Root(String),
    #[error("JSON pointer {pointer} traverses a non-container at '{token}'")]
    NotContainer { pointer: String, token: String },
    #[error("JSON pointer {pointer} has an out of range array index '{token}'")]
    Index { pointer: String, token: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Look up a value by JSON pointer (`/location/latitude`).
    pub fn get(&self, pointer: &str) -> Option<&Value> {
        let body = pointer.strip_prefix('/')?;
        let (head, rest) = match body.find('/') {
            Some(i) => body.split_at(i),
            None => (body, ""),
        };
        self.0.get(&unescape(head))?.pointer(rest)
    }

    pub fn has(&self, pointer: &str) -> bool {
        self.get(pointer).is_some()
    }

    /// Set a value by JSON pointer. Missing intermediate objects are
    /// created; `-` appends to an array.
    pub fn set(&mut self, pointer: &str, value: Value) -> Result<(), PointerError> {
        if pointer.is_empty() {
            return Err(PointerError::Root(String::new()));
        }
        if !pointer.starts_with('/') {
            return Err(PointerError::Malformed(pointer.to_string()));
        }
        let mut root = Value::Object(std::mem::take(&mut self.0));
        let result = assign(&mut root, pointer, value);
        if let Value::Object(map) = root {
            self.0 = map;
        }
        result
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn assign(root: &mut Value, pointer: &str, value: Value) -> Result<(), PointerError> {
    if let Some(slot) = root.pointer_mut(pointer) {
        *slot = value;
        return Ok(());
    }
    let (parent, last) = pointer.rsplit_once('/').unwrap_or(("", pointer));
    match container(root, parent, pointer)? {
        Value::Object(map) => {
            map.insert(unescape(last), value);
            Ok(())
        }
        Value::Array(items) if last == "-" => {
            items.push(value);
            Ok(())
        }
        Value::Array(_) => Err(PointerError::Index {
            pointer: pointer.to_string(),
            token: last.to_string(),
        }),
        _ => Err(PointerError::NotContainer {
            pointer: pointer.to_string(),
            token: unescape(last),
        }),
    }
}

/// Resolve `parent`, inserting empty objects for missing members.
fn container<'a>(
    root: &'a mut Value,
    parent: &str,
    pointer: &str,
) -> Result<&'a mut Value, PointerError> {
    if root.pointer(parent).is_none() {
        let (grand, token) = parent.rsplit_once('/').unwrap_or(("", parent));
        match container(root, grand, pointer)? {
            Value::Object(map) => {
                map.insert(unescape(token), Value::Object(Map::new()));
            }
            Value::Array(_) => {
                return Err(PointerError::Index {
                    pointer: pointer.to_string(),
                    token: token.to_string(),
                })
            }
            _ => {
                return Err(PointerError::NotContainer {
                    pointer: pointer.to_string(),
                    token: unescape(token),
                })
            }
        }
    }
    root.pointer_mut(parent)
        .ok_or_else(|| PointerError::Malformed(pointer.to_string()))
}

impl Deref for Message {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Message {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Non-object values become an empty message.
impl From<Value> for Message {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}
