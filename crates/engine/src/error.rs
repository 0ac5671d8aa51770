//! Engine error taxonomy.
//!
//! These are the kinds front-end collaborators translate into user-facing
//! messages; the engine itself never constructs human-facing text and
//! never swallows one of these.

use thiserror::Error;

use common::ReservationId;
use store::{ReservationState, StoreError};

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input. Not retried by the engine.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown or unavailable unit/reservation.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Legitimate contention loss: the unit cannot cover the requested
    /// quantity. Surfaced to the user as "sold out"; never retried
    /// automatically.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i32, available: i32 },

    /// Illegal lifecycle move; a programming or ordering error at the
    /// caller.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ReservationState,
        to: ReservationState,
    },

    /// Optimistic-lock loss on a state transition. The caller should
    /// reload and may retry once.
    #[error("Concurrent modification of reservation {0}")]
    ConcurrentModification(ReservationId),

    /// Pool or backing-store saturation. The caller should back off.
    #[error("Resource exhausted")]
    ResourceExhausted,

    /// Another call under the same idempotency key is mid-operation.
    /// The caller should retry shortly.
    #[error("Operation in flight for this idempotency key")]
    Retry,

    /// Store-internal failure (connectivity, corruption).
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnitNotFound(id) => EngineError::NotFound {
                entity: "inventory unit",
                id: id.to_string(),
            },
            // A withdrawn or expired unit is indistinguishable from a
            // missing one to buyers.
            StoreError::UnitNotActive { unit_id, .. } => EngineError::NotFound {
                entity: "inventory unit",
                id: unit_id.to_string(),
            },
            StoreError::ReservationNotFound(id) => EngineError::NotFound {
                entity: "reservation",
                id: id.to_string(),
            },
            StoreError::InsufficientStock {
                requested,
                available,
                ..
            } => EngineError::InsufficientStock {
                requested,
                available,
            },
            StoreError::ConcurrentModification { reservation_id, .. } => {
                EngineError::ConcurrentModification(reservation_id)
            }
            StoreError::InvalidStateTransition { from, to } => {
                EngineError::InvalidStateTransition { from, to }
            }
            StoreError::PoolExhausted => EngineError::ResourceExhausted,
            other => EngineError::Store(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::UnitId;

    #[test]
    fn store_kinds_map_onto_the_taxonomy() {
        let unit_id = UnitId::new();

        assert!(matches!(
            EngineError::from(StoreError::UnitNotFound(unit_id)),
            EngineError::NotFound { entity: "inventory unit", .. }
        ));
        assert!(matches!(
            EngineError::from(StoreError::InsufficientStock {
                unit_id,
                requested: 3,
                available: 1,
            }),
            EngineError::InsufficientStock {
                requested: 3,
                available: 1,
            }
        ));
        assert!(matches!(
            EngineError::from(StoreError::PoolExhausted),
            EngineError::ResourceExhausted
        ));
    }

    #[test]
    fn concurrent_modification_keeps_the_reservation_id() {
        let id = ReservationId::new();
        let mapped = EngineError::from(StoreError::ConcurrentModification {
            reservation_id: id,
            expected: ReservationState::Pending,
            actual: ReservationState::Confirmed,
        });
        assert!(matches!(
            mapped,
            EngineError::ConcurrentModification(got) if got == id
        ));
    }
}
