//! Stream parameter decoding.

use serde::de::DeserializeOwned;

use crate::traits::OpError;

/// Decode a stream's JSON params; a missing block (`null`) means "all defaults".
pub fn parse_params<T: DeserializeOwned>(kind: &str, params: &serde_json::Value) -> Result<T, OpError> {
    let value = if params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| OpError::Plan(format!("{kind}: bad params: {e}")))
}
