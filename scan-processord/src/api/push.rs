//! Push-subscription transport.
//!
//! The broker POSTs one message per request and redelivers unless it gets a
//! 2xx back, so acking a message means answering 204 and nacking means 503.

use axum::{body::Bytes, extract::State, http::StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::Instrument;
use crate::api::routes::AppState;
use crate::ingest::message::{Delivery, Disposition};

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 message body
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// A pushed message; its disposition becomes the HTTP response.
pub struct PushDelivery {
    payload: Vec<u8>,
    reply: oneshot::Sender<Disposition>,
}

impl Delivery for PushDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn ack(self) {
        let _ = self.reply.send(Disposition::Ack);
    }

    fn nack(self) {
        let _ = self.reply.send(Disposition::Nack);
    }
}

pub async fn receive_push(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let request: PushRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejected push request: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Some(expected) = &state.config.subscription {
        if request.subscription.as_deref() != Some(expected.as_str()) {
            tracing::warn!(
                "Rejected push from unexpected subscription {:?}",
                request.subscription
            );
            return StatusCode::FORBIDDEN;
        }
    }

    let message_id = request.message.message_id.unwrap_or_default();
    let payload = match STANDARD.decode(request.message.data.as_bytes()) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(message_id = %message_id, "Push message data is not base64: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let (reply, rx) = oneshot::channel();
    let span = tracing::debug_span!("push", message_id = %message_id);
    state
        .processor
        .handle(PushDelivery { payload, reply })
        .instrument(span)
        .await;

    match rx.await {
        Ok(Disposition::Ack) => StatusCode::NO_CONTENT,
        Ok(Disposition::Nack) | Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
