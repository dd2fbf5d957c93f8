use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scan result as published on the wire.
/// `data` stays opaque until `data_version` says how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEnvelope {
    /// Target address, e.g. "1.1.1.42"
    #[serde(rename = "ip")]
    pub address: String,

    /// Target port
    pub port: u16,

    /// Service name, e.g. "HTTP"
    pub service: String,

    /// Epoch timestamp of the observation; orders observations per key
    #[serde(rename = "timestamp")]
    pub observed_at: i64,

    /// Payload encoding version
    #[serde(rename = "data_version")]
    pub encoding_version: i64,

    /// Versioned payload, see [`ScanPayload`]
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Both shapes a payload can take. The wire format does not say which one is
/// meant, so both fields are optional and the envelope's version picks one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPayload {
    /// Version 1: raw response bytes, base64 on the wire
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub response_bytes_utf8: Option<Vec<u8>>,

    /// Version 2: response text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_str: Option<String>,
}

/// Canonical, version-independent scan record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub address: String,
    pub port: u16,
    pub service: String,
    pub observed_at: i64,
    /// Normalized response body, never empty
    pub response: String,
}

impl ScanRecord {
    pub fn key(&self) -> ScanKey {
        ScanKey {
            address: self.address.clone(),
            port: self.port,
            service: self.service.clone(),
        }
    }
}

/// Natural identity of a stored scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanKey {
    pub address: String,
    pub port: u16,
    pub service: String,
}

/// A scan row as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredScan {
    pub address: String,
    pub port: u16,
    pub service: String,
    pub observed_at: i64,
    pub response: String,

    /// 1 when inserted, bumped on every accepted update
    pub revision: i64,

    /// When the row was first written
    pub first_ingested_at: DateTime<Utc>,

    /// When the row was last changed
    pub last_ingested_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
