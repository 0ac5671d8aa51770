//! Durable store for inventory units and reservations.
//!
//! This crate owns the persisted shape of the engine's data and the locking
//! primitives that make reservation arithmetic safe under concurrency:
//! - Typed entities produced once at the store boundary
//! - The reservation state machine (pure transition rules)
//! - The [`InventoryStore`] trait whose methods are each one atomic unit of
//!   work, with PostgreSQL and in-memory implementations

pub mod entity;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod state;
pub mod store;

pub use common::{BuyerId, ConfirmationCode, ReservationId, SellerId, UnitId};
pub use entity::{
    IdempotencyRecord, InventoryUnit, NewInventoryUnit, NewReservation, Reservation,
    StateHistoryEntry, UnitStatus,
};
pub use error::{Result, StoreError};
pub use memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use state::{Actor, FulfillmentKind, ReservationState, actor_may_drive};
pub use store::{
    IdempotencyBegin, InventoryStore, OperationKind, ReleaseOutcome, ReleaseReason, UnitFilter,
};
