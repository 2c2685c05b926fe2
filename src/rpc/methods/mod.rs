pub mod initialize;
pub mod tools;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::protocol::{ERROR_INVALID_PARAMS, ErrorShape};

pub const BASE_METHODS: &[&str] = &[
    "initialize",
    "notifications/initialized",
    "ping",
    "tools/list",
    "tools/call",
];

pub(crate) fn parse_optional_params<T: DeserializeOwned>(
    method: &str,
    params: Option<&Value>,
) -> Result<T, ErrorShape> {
    let raw = match params {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(raw) => raw.clone(),
    };
    serde_json::from_value::<T>(raw).map_err(|error| {
        ErrorShape::new(
            ERROR_INVALID_PARAMS,
            format!("invalid {method} params: {error}"),
        )
    })
}

pub(crate) fn parse_required_params<T: DeserializeOwned>(
    method: &str,
    params: Option<&Value>,
) -> Result<T, ErrorShape> {
    let Some(raw) = params.filter(|raw| raw.is_object()).cloned() else {
        return Err(ErrorShape::new(
            ERROR_INVALID_PARAMS,
            format!("invalid {method} params: object required"),
        ));
    };

    serde_json::from_value::<T>(raw).map_err(|error| {
        ErrorShape::new(
            ERROR_INVALID_PARAMS,
            format!("invalid {method} params: {error}"),
        )
    })
}
