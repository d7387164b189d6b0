//! Flat per-instance attribute maps handed to and from the configuration framework.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::TanukiError;

pub type AttrMap = serde_json::Map<String, Value>;

/// Tracked state of one resource instance: its encoded id plus attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: String,
    #[serde(default)]
    pub attributes: AttrMap,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, attributes: AttrMap) -> Self { Self { id: id.into(), attributes } }

    /// Build a state from a typed attribute struct.
    pub fn from_typed<T: Serialize>(id: impl Into<String>, attrs: &T) -> Result<Self, TanukiError> {
        Ok(Self::new(id, to_attr_map(attrs)?))
    }

    /// Decode the attributes into a typed struct; unknown or mistyped fields become validation errors.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T, TanukiError> { from_attr_map(&self.attributes) }
}

pub fn to_attr_map<T: Serialize>(v: &T) -> Result<AttrMap, TanukiError> {
    match serde_json::to_value(v) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TanukiError::validation(format!("expected an attribute object, got {}", other))),
        Err(e) => Err(TanukiError::validation(format!("serializing attributes: {}", e))),
    }
}

pub fn from_attr_map<T: DeserializeOwned>(map: &AttrMap) -> Result<T, TanukiError> {
    serde_json::from_value(Value::Object(map.clone())).map_err(|e| TanukiError::validation(format!("invalid attributes: {}", e)))
}
