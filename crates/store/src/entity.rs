//! Typed entities produced at the store boundary.
//!
//! Every row shape crosses into the rest of the system exactly once, as one
//! of these structs. Nothing downstream branches on representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{BuyerId, ConfirmationCode, ReservationId, SellerId, UnitId};

use crate::state::{Actor, FulfillmentKind, ReservationState};

/// Status of a sellable inventory unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Listed and reservable.
    Active,
    /// Pulled by the seller; no new reservations.
    Withdrawn,
    /// Past its sale window; no new reservations.
    Expired,
}

impl UnitStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Active => "active",
            UnitStatus::Withdrawn => "withdrawn",
            UnitStatus::Expired => "expired",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UnitStatus::Active),
            "withdrawn" => Some(UnitStatus::Withdrawn),
            "expired" => Some(UnitStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A seller's sellable lot with a finite remaining quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUnit {
    pub id: UnitId,
    pub seller_id: SellerId,
    /// Quantity at publish time. Never changes after creation.
    pub total_quantity: i32,
    /// Units still reservable. `remaining + Σ quantity(live reservations)
    /// = total` at all times.
    pub remaining_quantity: i32,
    pub status: UnitStatus,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryUnit {
    /// Returns true if new reservations are accepted against this unit.
    pub fn is_active(&self) -> bool {
        self.status == UnitStatus::Active
    }

    /// Quantity currently held by live reservations.
    pub fn reserved_quantity(&self) -> i32 {
        self.total_quantity - self.remaining_quantity
    }
}

/// Input for publishing a new inventory unit.
#[derive(Debug, Clone)]
pub struct NewInventoryUnit {
    pub id: UnitId,
    pub seller_id: SellerId,
    pub quantity: i32,
    pub published_at: DateTime<Utc>,
}

/// A buyer's claim on a quantity of an inventory unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub unit_id: UnitId,
    pub buyer_id: BuyerId,
    pub quantity: i32,
    pub state: ReservationState,
    pub fulfillment: FulfillmentKind,
    pub confirmation_code: ConfirmationCode,
    pub created_at: DateTime<Utc>,
    /// Deadline for seller acceptance. Cleared on confirmation; `None`
    /// thereafter.
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set when a sweeper claims this reservation for expiry. Acts as a
    /// lease: a claim older than the lease window is up for grabs again.
    pub sweep_claimed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Returns true if the reservation is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if the reservation still counts against the unit's
    /// remaining quantity. Completed reservations count: their stock was
    /// handed over, not returned. `remaining + Σ quantity(holds_stock)`
    /// equals the unit's total at all times.
    pub fn holds_stock(&self) -> bool {
        !self.state.returns_stock()
    }

    /// Returns true if the hold has lapsed as of `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Pending
            && self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Input for creating a reservation. The caller supplies identifiers,
/// code, and timestamps; the store supplies atomicity.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: ReservationId,
    pub unit_id: UnitId,
    pub buyer_id: BuyerId,
    pub quantity: i32,
    pub fulfillment: FulfillmentKind,
    pub confirmation_code: ConfirmationCode,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One entry in a reservation's append-only state-history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    /// Monotonically increasing across the whole log.
    pub seq: i64,
    pub reservation_id: ReservationId,
    /// `None` for the creation entry.
    pub from_state: Option<ReservationState>,
    pub to_state: ReservationState,
    pub actor: Actor,
    pub recorded_at: DateTime<Utc>,
}

/// Stored result of a mutating call under an idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: crate::store::OperationKind,
    /// Id of the entity the first call produced; `None` while in flight.
    pub entity_id: Option<Uuid>,
    /// Snapshot of the first call's response; `None` while in flight.
    pub response: Option<serde_json::Value>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
