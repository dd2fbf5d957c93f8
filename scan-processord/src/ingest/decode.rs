//! Envelope decoding.
//!
//! Turns a raw message body into a [`ScanRecord`]. The payload is only
//! interpreted once `data_version` has selected an encoding; which of the
//! payload fields happens to be present never decides anything.

use shared::protocol::{DATA_VERSION_V1, DATA_VERSION_V2};
use shared::types::{ScanEnvelope, ScanPayload, ScanRecord};
use thiserror::Error;

/// Why a message body could not become a record. None of these are retryable.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown data version: {0}")]
    UnknownVersion(i64),

    #[error("payload missing response data")]
    EmptyPayload,
}

impl DecodeFailure {
    /// Log classification, keeps producer bugs apart from bad data
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeFailure::Malformed(_) => "malformed",
            DecodeFailure::UnknownVersion(_) => "contract_violation",
            DecodeFailure::EmptyPayload => "data_quality",
        }
    }
}

/// Payload encodings, one per known `data_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Version 1: `response_bytes_utf8`
    BytesUtf8,
    /// Version 2: `response_str`
    Text,
}

impl PayloadEncoding {
    pub fn from_version(version: i64) -> Option<Self> {
        match version {
            DATA_VERSION_V1 => Some(PayloadEncoding::BytesUtf8),
            DATA_VERSION_V2 => Some(PayloadEncoding::Text),
            _ => None,
        }
    }

    /// Pull the response out of the field this encoding owns. A missing field
    /// resolves to an empty response.
    fn response(self, payload: ScanPayload) -> Result<String, DecodeFailure> {
        match self {
            PayloadEncoding::BytesUtf8 => {
                String::from_utf8(payload.response_bytes_utf8.unwrap_or_default()).map_err(|e| {
                    DecodeFailure::Malformed(format!("response_bytes_utf8 is not UTF-8: {}", e))
                })
            }
            PayloadEncoding::Text => Ok(payload.response_str.unwrap_or_default()),
        }
    }
}

/// Decode a raw message body into a canonical record.
pub fn decode(raw: &[u8]) -> Result<ScanRecord, DecodeFailure> {
    let ScanEnvelope {
        address,
        port,
        service,
        observed_at,
        encoding_version,
        data,
    } = serde_json::from_slice(raw)
        .map_err(|e| DecodeFailure::Malformed(format!("envelope: {}", e)))?;

    let payload = parse_payload(data)?;

    let encoding = PayloadEncoding::from_version(encoding_version)
        .ok_or(DecodeFailure::UnknownVersion(encoding_version))?;

    let response = encoding.response(payload)?;
    if response.is_empty() {
        return Err(DecodeFailure::EmptyPayload);
    }

    Ok(ScanRecord {
        address,
        port,
        service,
        observed_at,
        response,
    })
}

fn parse_payload(data: serde_json::Value) -> Result<ScanPayload, DecodeFailure> {
    match data {
        serde_json::Value::Null => Ok(ScanPayload::default()),
        serde_json::Value::Object(_) => serde_json::from_value(data)
            .map_err(|e| DecodeFailure::Malformed(format!("data: {}", e))),
        other => Err(DecodeFailure::Malformed(format!(
            "data must be an object, got {}",
            other
        ))),
    }
}
