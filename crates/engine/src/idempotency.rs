//! Idempotency guard over the store's record primitives.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use store::{IdempotencyBegin, InventoryStore, OperationKind};

use crate::error::{EngineError, Result};

/// Outcome of consulting the guard before a mutating operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    /// No prior call under this key: execute the operation, then call
    /// [`IdempotencyGuard::complete`].
    Fresh,
    /// A prior call completed; this is its stored result. Do not
    /// re-execute.
    Replayed(T),
}

/// Deduplicates retried mutating requests by client-supplied key.
///
/// Scoped per operation type; a key in flight surfaces as
/// [`EngineError::Retry`] rather than a second execution, which is what
/// stops a resubmitted checkout from reserving twice.
pub struct IdempotencyGuard<S> {
    store: S,
    ttl: Duration,
}

impl<S: InventoryStore> IdempotencyGuard<S> {
    /// Creates a guard over the given store with the given record TTL.
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Opens the window for `(key, operation)`.
    ///
    /// Returns `Fresh` when the caller should execute, `Replayed` with
    /// the stored result when a prior call finished, and `Retry` when a
    /// concurrent call holds the window.
    pub async fn begin<T: DeserializeOwned>(
        &self,
        key: &str,
        operation: OperationKind,
        now: DateTime<Utc>,
    ) -> Result<Guarded<T>> {
        match self
            .store
            .idempotency_begin(key, operation, now, self.ttl)
            .await?
        {
            IdempotencyBegin::Fresh => Ok(Guarded::Fresh),
            IdempotencyBegin::InFlight => {
                metrics::counter!("idempotency_in_flight_total").increment(1);
                Err(EngineError::Retry)
            }
            IdempotencyBegin::Completed(record) => {
                metrics::counter!("idempotency_replays_total").increment(1);
                let response = record
                    .response
                    .ok_or_else(|| serde_json::Error::io(std::io::Error::other(
                        "completed idempotency record has no response",
                    )))
                    .and_then(serde_json::from_value)
                    .map_err(|e| EngineError::Store(e.into()))?;
                Ok(Guarded::Replayed(response))
            }
        }
    }

    /// Discards the window after the guarded operation failed, so the
    /// same key can be retried instead of reading as in-flight until the
    /// TTL lapses.
    pub async fn abort(&self, key: &str, operation: OperationKind) -> Result<()> {
        self.store.idempotency_remove(key, operation).await?;
        Ok(())
    }

    /// Persists the operation's result, closing the window.
    ///
    /// The operation has already committed by the time this runs; a
    /// failure here only costs the dedupe, so the caller logs it rather
    /// than failing the request.
    pub async fn complete<T: Serialize>(
        &self,
        key: &str,
        operation: OperationKind,
        entity_id: Uuid,
        result: &T,
    ) -> Result<()> {
        let response = serde_json::to_value(result).map_err(|e| EngineError::Store(e.into()))?;
        self.store
            .idempotency_complete(key, operation, entity_id, response)
            .await?;
        Ok(())
    }
}
