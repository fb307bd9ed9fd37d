// Row <-> typed record conversion for adapter results.

use serde::de::DeserializeOwned;
use serde_json::Value;

use sso_bridge_core::error::{Result, SsoError};

pub(crate) fn decode<T: DeserializeOwned>(table: &str, row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| SsoError::Database(format!("malformed {table} row: {e}")))
}

pub(crate) fn decode_all<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(|row| decode(table, row)).collect()
}
