mod batch_job;
mod campaign;
mod thread;

pub use batch_job::*;
pub use campaign::*;
pub use thread::*;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::DbError;

pub(crate) fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_default()
}

pub(crate) fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    id: &str,
    column: &'static str,
    raw: &str,
) -> Result<T, DbError> {
    serde_json::from_str(raw).map_err(|source| DbError::Corrupt {
        id: id.to_string(),
        column,
        source,
    })
}

pub(crate) fn optional_json(
    id: &str,
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<Value>, DbError> {
    raw.map(|r| from_json(id, column, &r)).transpose()
}
