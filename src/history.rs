//! Sensor history views.
//!
//! The store holds two append logs, `/Client/SensorData` and
//! `/Server/SensorData`, each a map from opaque push keys to records carrying
//! a `timestamp`. Every view call reads one root snapshot and derives both
//! devices' answers from it. Ordering always comes from the parsed timestamps,
//! never from the store's key order.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::store::SnapshotStore;

pub const CLIENT: &str = "Client";
pub const SERVER: &str = "Server";
pub const SENSOR_DATA: &str = "SensorData";
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Records returned per device by the logs view.
pub const DEFAULT_LOG_LIMIT: usize = 10;

/// One timestamped sensor reading, a copy of the stored JSON object.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SensorRecord(Map<String, Value>);

impl SensorRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Parsed `timestamp` field.
    pub fn timestamp(&self) -> Result<i64, StoreError> {
        let raw = self.0.get(TIMESTAMP_FIELD).ok_or_else(|| {
            StoreError::Malformed(format!("record has no {}", TIMESTAMP_FIELD))
        })?;
        parse_timestamp("", raw)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Per-device answer, serialized as `{"Client": ..., "Server": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceViews<T> {
    #[serde(rename = "Client")]
    pub client: T,
    #[serde(rename = "Server")]
    pub server: T,
}

/// Parse a record timestamp: JSON integer, integral-valued number, or a
/// string holding an integer.
pub fn parse_timestamp(key: &str, value: &Value) -> Result<i64, StoreError> {
    let malformed = || StoreError::MalformedTimestamp {
        key: key.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(v)
            } else if let Some(v) = n.as_f64().filter(|f| f.is_finite()) {
                let truncated = v.trunc();
                if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
                    Ok(truncated as i64)
                } else {
                    Err(malformed())
                }
            } else {
                Err(malformed())
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| malformed()),
        _ => Err(malformed()),
    }
}

/// Entries of a log in store iteration order, with parsed timestamps.
fn timestamped_entries(log: &Value) -> Result<Vec<(i64, SensorRecord)>, StoreError> {
    let entries: Vec<(String, &Value)> = match log {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        // Integer-keyed logs come back from the REST API as sparse arrays.
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => {
            return Err(StoreError::Malformed(format!(
                "sensor log must be an object, got {}",
                json_kind(other)
            )))
        }
    };

    entries
        .into_iter()
        .map(|(key, value)| {
            let Value::Object(fields) = value else {
                return Err(StoreError::Malformed(format!(
                    "record {} must be an object, got {}",
                    key,
                    json_kind(value)
                )));
            };
            let raw = fields.get(TIMESTAMP_FIELD).ok_or_else(|| {
                StoreError::Malformed(format!("record {} has no {}", key, TIMESTAMP_FIELD))
            })?;
            let timestamp = parse_timestamp(&key, raw)?;
            Ok((timestamp, SensorRecord(fields.clone())))
        })
        .collect()
}

/// Record with the greatest timestamp. Ties go to the entry seen last.
pub fn latest_record(log: &Value) -> Result<SensorRecord, StoreError> {
    timestamped_entries(log)?
        .into_iter()
        .fold(None::<(i64, SensorRecord)>, |best, (ts, record)| match best {
            Some((best_ts, _)) if ts < best_ts => best,
            _ => Some((ts, record)),
        })
        .map(|(_, record)| record)
        .ok_or_else(|| StoreError::NotFound("sensor log is empty".to_string()))
}

/// Up to `limit` records, newest first. Equal timestamps keep store order.
pub fn top_records(log: &Value, limit: usize) -> Result<Vec<SensorRecord>, StoreError> {
    let mut entries = timestamped_entries(log)?;
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(entries
        .into_iter()
        .take(limit)
        .map(|(_, record)| record)
        .collect())
}

/// Reader producing the latest-value and top-N views for both devices.
pub struct SensorHistory<S> {
    store: S,
}

impl<S: SnapshotStore> SensorHistory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Most recent record per device.
    pub fn latest_view(&self) -> Result<DeviceViews<SensorRecord>, StoreError> {
        let snapshot = self.store.read("/")?;
        Ok(DeviceViews {
            client: latest_record(sensor_log(&snapshot, CLIENT)?)?,
            server: latest_record(sensor_log(&snapshot, SERVER)?)?,
        })
    }

    /// Newest `limit` records per device.
    pub fn logs_view(&self, limit: usize) -> Result<DeviceViews<Vec<SensorRecord>>, StoreError> {
        let snapshot = self.store.read("/")?;
        Ok(DeviceViews {
            client: top_records(sensor_log(&snapshot, CLIENT)?, limit)?,
            server: top_records(sensor_log(&snapshot, SERVER)?, limit)?,
        })
    }
}

fn sensor_log<'a>(snapshot: &'a Value, device: &str) -> Result<&'a Value, StoreError> {
    snapshot
        .get(device)
        .and_then(|subtree| subtree.get(SENSOR_DATA))
        .filter(|log| !log.is_null())
        .ok_or_else(|| StoreError::NotFound(format!("/{}/{}", device, SENSOR_DATA)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
