use serde::Serialize;

use crate::error::EvalError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, EvalError> {
    Ok(serde_json::to_string_pretty(value)?)
}
