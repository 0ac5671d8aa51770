//! Store error types.

use thiserror::Error;

use common::{ReservationId, UnitId};

use crate::entity::UnitStatus;
use crate::state::ReservationState;

/// Errors that can occur when interacting with the inventory store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The inventory unit does not exist.
    #[error("Inventory unit not found: {0}")]
    UnitNotFound(UnitId),

    /// The inventory unit exists but is no longer reservable.
    #[error("Inventory unit {unit_id} is {status}, not active")]
    UnitNotActive { unit_id: UnitId, status: UnitStatus },

    /// The reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The unit's remaining quantity cannot cover the request.
    #[error("Insufficient stock on unit {unit_id}: requested {requested}, available {available}")]
    InsufficientStock {
        unit_id: UnitId,
        requested: i32,
        available: i32,
    },

    /// A guarded state transition lost to a concurrent writer.
    /// The stored state no longer matches the expected pre-state.
    #[error("Concurrent modification of reservation {reservation_id}: state is {actual}, expected {expected}")]
    ConcurrentModification {
        reservation_id: ReservationId,
        expected: ReservationState,
        actual: ReservationState,
    },

    /// The requested transition is not an edge of the state machine.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ReservationState,
        to: ReservationState,
    },

    /// The connection pool is saturated; the caller should back off.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A stored value could not be decoded into its typed form.
    #[error("Unrecognized {column} value in store: {value:?}")]
    Decode {
        column: &'static str,
        value: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
