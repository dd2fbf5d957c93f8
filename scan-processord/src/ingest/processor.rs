use std::sync::Arc;
use crate::ingest::decode::{decode, DecodeFailure};
use crate::ingest::message::{Delivery, Disposition};
use crate::store::{ScanStore, StorageError, UpsertOutcome};

/// What happened to one message
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Written, or recognised as stale
    Stored(UpsertOutcome),
    /// Never reached the store
    Rejected(DecodeFailure),
    /// The store could not be reached or failed
    StoreFailed(StorageError),
}

impl ProcessOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            ProcessOutcome::Stored(_) => Disposition::Ack,
            ProcessOutcome::Rejected(_) | ProcessOutcome::StoreFailed(_) => Disposition::Nack,
        }
    }

    /// Short label for logs: the upsert outcome or the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessOutcome::Stored(outcome) => outcome.as_str(),
            ProcessOutcome::Rejected(failure) => failure.kind(),
            ProcessOutcome::StoreFailed(e) => e.kind(),
        }
    }
}

/// Decodes messages and reconciles them into the store.
///
/// Holds no mutable state; concurrent calls only meet inside the store.
pub struct Processor<S> {
    store: Arc<S>,
}

impl<S: ScanStore> Processor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Process a message and settle it exactly once.
    pub async fn handle<M: Delivery>(&self, message: M) -> Disposition {
        let outcome = self.process(message.payload()).await;
        let disposition = outcome.disposition();
        tracing::debug!(kind = outcome.kind(), "Settling message with {:?}", disposition);
        disposition.apply(message);
        disposition
    }

    /// Decode and persist a message body. Never panics on bad input.
    pub async fn process(&self, payload: &[u8]) -> ProcessOutcome {
        let record = match decode(payload) {
            Ok(record) => record,
            Err(failure) => {
                log_rejection(&failure);
                return ProcessOutcome::Rejected(failure);
            }
        };

        let key = record.key();
        let observed_at = record.observed_at;

        match self.store.persist(record).await {
            Ok(outcome) => {
                match outcome {
                    UpsertOutcome::IgnoredStale => tracing::debug!(
                        outcome = outcome.as_str(),
                        "Ignored stale scan for {}:{}/{} (ts={})",
                        key.address, key.port, key.service, observed_at
                    ),
                    _ => tracing::info!(
                        outcome = outcome.as_str(),
                        "Stored scan for {}:{}/{} (ts={})",
                        key.address, key.port, key.service, observed_at
                    ),
                }
                ProcessOutcome::Stored(outcome)
            }
            Err(e) => {
                tracing::warn!(
                    kind = e.kind(),
                    "Failed storing scan for {}:{}/{} (ts={}): {}",
                    key.address, key.port, key.service, observed_at, e
                );
                ProcessOutcome::StoreFailed(e)
            }
        }
    }
}

fn log_rejection(failure: &DecodeFailure) {
    match failure {
        // Producer bug rather than bad luck, so it gets its own level
        DecodeFailure::UnknownVersion(_) => {
            tracing::error!(kind = failure.kind(), "Rejected scan message: {}", failure)
        }
        _ => tracing::warn!(kind = failure.kind(), "Rejected scan message: {}", failure),
    }
}
