use serde_json::Value;

use crate::error::{Result, StoreError};

/// A typed store value, mirroring the store's `<TYPE> <value>` messages.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Str(String),
    Err(String),
    Bool(bool),
    Uint(u64),
    Int(i64),
    Float(f64),
    Json(Value),
    Null,
}

impl DbValue {
    /// Parses a `<TYPE> <value>` message from the store.
    pub fn parse_message(msg: &str) -> Result<DbValue> {
        let (tag, rest) = msg
            .split_once(' ')
            .ok_or_else(|| StoreError::Protocol(format!("message has no type tag: `{msg}`")))?;

        match tag {
            "STR" => Ok(DbValue::Str(rest.to_string())),
            "ERR" => Ok(DbValue::Err(rest.to_string())),
            "BOOL" => match rest {
                "true" => Ok(DbValue::Bool(true)),
                "false" => Ok(DbValue::Bool(false)),
                other => Err(StoreError::Protocol(format!("invalid boolean value: `{other}`"))),
            },
            "UINT" => rest
                .parse::<u64>()
                .map(DbValue::Uint)
                .map_err(|e| StoreError::Protocol(format!("invalid UINT value: {e}"))),
            "INT" => rest
                .parse::<i64>()
                .map(DbValue::Int)
                .map_err(|e| StoreError::Protocol(format!("invalid INT value: {e}"))),
            "FLOAT" => rest
                .parse::<f64>()
                .map(DbValue::Float)
                .map_err(|e| StoreError::Protocol(format!("invalid FLOAT value: {e}"))),
            "JSON" => serde_json::from_str(rest)
                .map(DbValue::Json)
                .map_err(|e| StoreError::Protocol(format!("invalid JSON value: {e}"))),
            "NULL" => Ok(DbValue::Null),
            other => Err(StoreError::Protocol(format!("unknown value type: `{other}`"))),
        }
    }

    /// Renders the value back into its wire message form.
    pub fn to_message(&self) -> String {
        match self {
            DbValue::Str(s) => format!("STR {s}"),
            DbValue::Err(e) => format!("ERR {e}"),
            DbValue::Bool(b) => format!("BOOL {b}"),
            DbValue::Uint(n) => format!("UINT {n}"),
            DbValue::Int(n) => format!("INT {n}"),
            DbValue::Float(f) => format!("FLOAT {f}"),
            DbValue::Json(v) => format!("JSON {v}"),
            DbValue::Null => "NULL null".to_string(),
        }
    }

    /// Unwraps a JSON value, treating `ERR` messages as store rejections.
    pub fn into_json(self) -> Result<Value> {
        match self {
            DbValue::Json(v) => Ok(v),
            DbValue::Null => Ok(Value::Null),
            DbValue::Err(e) => Err(StoreError::Rejected(e)),
            other => Err(StoreError::Protocol(format!("expected JSON value, got {other:?}"))),
        }
    }
}
