//! Core data models for the ingestion pipeline

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Error returned when a value is not shaped like a JSON object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("data point must serialize to a JSON object, got {found}")]
pub struct InvalidDataPoint {
    /// JSON type that was found instead of an object
    pub found: &'static str,
}

/// One measurement record, always a JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct DataPoint(Map<String, Value>);

impl DataPoint {
    /// Wrap a JSON value, rejecting anything that is not an object
    pub fn from_value(value: Value) -> Result<Self, InvalidDataPoint> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(InvalidDataPoint {
                found: json_type_name(&other),
            }),
        }
    }

    /// Serialize any value and wrap the result if it is a JSON object
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self, InvalidDataPoint> {
        let value = serde_json::to_value(value).map_err(|_| InvalidDataPoint {
            found: "unserializable value",
        })?;
        Self::from_value(value)
    }

    /// Stable identifier from `header.id`, if the point carries one
    pub fn id(&self) -> Option<&str> {
        self.0
            .get("header")
            .and_then(|h| h.get("id"))
            .and_then(Value::as_str)
    }

    /// Lowercase hex SHA-256 over the canonical (sorted-key) JSON encoding
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Canonical JSON encoding
    pub fn to_json(&self) -> String {
        // serde_json::Map is ordered by key, so this is stable for equal points
        Value::Object(self.0.clone()).to_string()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for DataPoint {
    type Error = InvalidDataPoint;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<DataPoint> for Value {
    fn from(point: DataPoint) -> Self {
        point.into_value()
    }
}

/// Returns true iff `value` serializes to a JSON object
pub fn is_valid_data_point<T: Serialize + ?Sized>(value: &T) -> bool {
    matches!(serde_json::to_value(value), Ok(Value::Object(_)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Statically typed conversion into a [`DataPoint`]
pub trait DataPointConvertible {
    fn to_data_point(&self) -> DataPoint;
}

impl DataPointConvertible for DataPoint {
    fn to_data_point(&self) -> DataPoint {
        self.clone()
    }
}

/// Opaque credential returned by sign-in
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("Token {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Schema identifier carried in a measurement header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaId {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

/// How a measurement was acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Sensed,
    SelfReported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionProvenance {
    pub source_name: String,
    pub modality: Modality,
}

/// Header of a measurement record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementHeader {
    pub id: String,
    pub creation_date_time: String,
    pub schema_id: SchemaId,
    pub acquisition_provenance: AcquisitionProvenance,
}

/// A measurement in the header + body layout used by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub header: MeasurementHeader,
    pub body: Map<String, Value>,
}

impl Measurement {
    /// Create a measurement with a fresh id, stamped now
    pub fn new(
        schema_id: SchemaId,
        provenance: AcquisitionProvenance,
        body: Map<String, Value>,
    ) -> Self {
        Self::with_timestamp(schema_id, provenance, body, Utc::now())
    }

    pub fn with_timestamp(
        schema_id: SchemaId,
        provenance: AcquisitionProvenance,
        body: Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            header: MeasurementHeader {
                id: Uuid::new_v4().to_string(),
                creation_date_time: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                schema_id,
                acquisition_provenance: provenance,
            },
            body,
        }
    }
}

impl DataPointConvertible for Measurement {
    fn to_data_point(&self) -> DataPoint {
        let mut map = Map::new();
        // Both halves are plain structs of strings and JSON maps; serialization cannot fail.
        if let Ok(header) = serde_json::to_value(&self.header) {
            map.insert("header".to_string(), header);
        }
        map.insert("body".to_string(), Value::Object(self.body.clone()));
        DataPoint(map)
    }
}
