//! Wire shapes carried over the message channel
//!
//! Storage traffic uses `{event, id, data}`. Signer calls use
//! `{id, method, params}` and are answered with `{id, result}` or
//! `{id, error}`. Raw bytes travel as `{"type": "Buffer", "data": [..]}`
//! because the channel only moves strings.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix reserved for storage events
pub const STORAGE_EVENT_PREFIX: &str = "storage:";

/// Reserved storage events the host answers on the sandbox's behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageEvent {
    Get,
    Set,
    Remove,
    Flush,
}

impl StorageEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEvent::Get => "storage:get",
            StorageEvent::Set => "storage:set",
            StorageEvent::Remove => "storage:remove",
            StorageEvent::Flush => "storage:flush",
        }
    }

    /// Classify an event name.
    ///
    /// Returns `Ok(None)` for events outside the reserved namespace and a
    /// `Protocol` error for unknown events inside it.
    pub fn parse(event: &str) -> Result<Option<Self>> {
        if !event.starts_with(STORAGE_EVENT_PREFIX) {
            return Ok(None);
        }
        match event {
            "storage:get" => Ok(Some(StorageEvent::Get)),
            "storage:set" => Ok(Some(StorageEvent::Set)),
            "storage:remove" => Ok(Some(StorageEvent::Remove)),
            "storage:flush" => Ok(Some(StorageEvent::Flush)),
            other => Err(Error::Protocol(format!(
                "unknown storage event '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StorageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage envelope, used for both the request and its correlated response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEnvelope {
    pub event: String,
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

impl StorageEnvelope {
    pub fn new(event: StorageEvent, id: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.as_str().to_string(),
            id: id.into(),
            data,
        }
    }
}

/// Typed payload of a storage envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRequest {
    Get { key: String },
    Set { key: String, value: String },
    Remove { key: String },
    Flush { origin: String },
}

#[derive(Deserialize)]
struct KeyData {
    key: String,
}

#[derive(Deserialize)]
struct SetData {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct FlushData {
    origin: String,
}

impl StorageRequest {
    /// Decode the payload of a reserved storage event
    pub fn from_data(event: StorageEvent, data: Value) -> Result<Self> {
        let parsed = match event {
            StorageEvent::Get => {
                serde_json::from_value::<KeyData>(data).map(|d| StorageRequest::Get { key: d.key })
            }
            StorageEvent::Set => serde_json::from_value::<SetData>(data).map(|d| {
                StorageRequest::Set {
                    key: d.key,
                    value: d.value,
                }
            }),
            StorageEvent::Remove => serde_json::from_value::<KeyData>(data)
                .map(|d| StorageRequest::Remove { key: d.key }),
            StorageEvent::Flush => serde_json::from_value::<FlushData>(data)
                .map(|d| StorageRequest::Flush { origin: d.origin }),
        };
        parsed.map_err(|e| Error::Protocol(format!("malformed {} payload: {}", event, e)))
    }

    pub fn event(&self) -> StorageEvent {
        match self {
            StorageRequest::Get { .. } => StorageEvent::Get,
            StorageRequest::Set { .. } => StorageEvent::Set,
            StorageRequest::Remove { .. } => StorageEvent::Remove,
            StorageRequest::Flush { .. } => StorageEvent::Flush,
        }
    }
}

/// Outbound signer call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Error body returned by the signer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

/// Inbound answer to an [`RpcRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Whether a decoded JSON object looks like a signer response
    pub fn matches(value: &Value) -> bool {
        value.get("id").map(Value::is_string).unwrap_or(false)
            && (value.get("result").is_some() || value.get("error").is_some())
    }

    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::Signer(err.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Channel-safe wrapper for raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelBuffer {
    Buffer { data: Vec<u8> },
}

impl ChannelBuffer {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ChannelBuffer::Buffer { data: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ChannelBuffer::Buffer { data } => data,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ChannelBuffer::Buffer { data } => data,
        }
    }
}
