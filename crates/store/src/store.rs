//! The inventory store contract.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{ReservationId, SellerId, UnitId};

use crate::entity::{
    IdempotencyRecord, InventoryUnit, NewInventoryUnit, NewReservation, Reservation,
    StateHistoryEntry, UnitStatus,
};
use crate::error::Result;
use crate::state::{Actor, ReservationState};

/// Why a reservation is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Explicit cancellation by a buyer or seller.
    Cancelled(Actor),
    /// The pending hold lapsed; driven by the expiry sweeper.
    Expired,
}

impl ReleaseReason {
    /// Terminal state this release lands the reservation in.
    pub fn target_state(&self) -> ReservationState {
        match self {
            ReleaseReason::Cancelled(_) => ReservationState::Cancelled,
            ReleaseReason::Expired => ReservationState::Expired,
        }
    }

    /// Actor recorded in the history log.
    pub fn actor(&self) -> Actor {
        match self {
            ReleaseReason::Cancelled(actor) => *actor,
            ReleaseReason::Expired => Actor::System,
        }
    }
}

/// Outcome of a release call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    /// The reservation was live; stock has been returned to the unit.
    Released(Reservation),
    /// The reservation was already terminal; nothing changed.
    AlreadyTerminal(Reservation),
}

impl ReleaseOutcome {
    /// The reservation in its post-call state.
    pub fn reservation(&self) -> &Reservation {
        match self {
            ReleaseOutcome::Released(r) | ReleaseOutcome::AlreadyTerminal(r) => r,
        }
    }

    /// Returns true if this call actually changed the store.
    pub fn released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released(_))
    }
}

/// Filter for browsing inventory units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitFilter {
    /// Restrict to one seller's units.
    pub seller_id: Option<SellerId>,
    /// Include active units with zero remaining quantity ("sold out").
    pub include_sold_out: bool,
}

impl UnitFilter {
    /// Filter matching every active unit with stock remaining.
    pub fn available() -> Self {
        Self::default()
    }

    /// Restricts the filter to one seller.
    pub fn for_seller(mut self, seller_id: SellerId) -> Self {
        self.seller_id = Some(seller_id);
        self
    }

    /// Stable string form used to key cached listings.
    pub fn signature(&self) -> String {
        let seller = self
            .seller_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "any".to_string());
        format!("{}:{}", seller, self.include_sold_out)
    }
}

/// Operation type scoping an idempotency key.
///
/// The same client key under different operations never collides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Reservation creation.
    Reserve,
    /// Payment initiation at the gateway boundary.
    PaymentInitiation,
}

impl OperationKind {
    /// Returns the operation name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Reserve => "reserve",
            OperationKind::PaymentInitiation => "payment_initiation",
        }
    }

    /// Parses a stored operation name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserve" => Some(OperationKind::Reserve),
            "payment_initiation" => Some(OperationKind::PaymentInitiation),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of opening an idempotency window.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyBegin {
    /// No record existed; a placeholder is now registered and the caller
    /// should execute the operation, then call `idempotency_complete`.
    Fresh,
    /// Another call under this key is mid-operation.
    InFlight,
    /// A prior call completed; its stored result should be returned
    /// without re-executing.
    Completed(IdempotencyRecord),
}

/// Core trait for inventory store implementations.
///
/// Each method is one atomic unit of work. Methods that mutate a unit's
/// remaining quantity take an exclusive lock scoped to that single unit
/// row; reservations against different units never contend. All
/// implementations must be thread-safe (`Send + Sync`).
///
/// The store never consults a wall clock: callers pass `now` in, keeping
/// every time-dependent decision injectable.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Publishes a new inventory unit with `remaining = total = quantity`.
    async fn insert_unit(&self, unit: NewInventoryUnit) -> Result<InventoryUnit>;

    /// Fetches a unit by id.
    async fn get_unit(&self, unit_id: UnitId) -> Result<Option<InventoryUnit>>;

    /// Lists units matching the filter. Only `Active` units are returned;
    /// sold-out units are excluded unless the filter asks for them.
    async fn list_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>>;

    /// Changes a unit's status (withdraw, expire).
    async fn set_unit_status(
        &self,
        unit_id: UnitId,
        status: UnitStatus,
        now: DateTime<Utc>,
    ) -> Result<InventoryUnit>;

    /// Creates a reservation in `Pending`, decrementing the unit's
    /// remaining quantity, in one unit of work under the unit row lock:
    /// re-read, availability check, decrement, insert, history entry.
    ///
    /// Fails with `UnitNotFound`/`UnitNotActive` if the unit cannot take
    /// reservations and `InsufficientStock` if the remaining quantity is
    /// short — in which case nothing is changed.
    ///
    /// This is the only operation in the system that decrements
    /// `remaining_quantity`.
    async fn reserve(&self, reservation: NewReservation) -> Result<Reservation>;

    /// Releases a reservation, returning its quantity to the unit under
    /// the same lock discipline as [`reserve`](Self::reserve). Idempotent:
    /// releasing an already-terminal reservation is a no-op reported as
    /// `AlreadyTerminal`.
    async fn release(
        &self,
        reservation_id: ReservationId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome>;

    /// Advances a reservation `expected → target` as a single guarded
    /// update: if the stored state no longer equals `expected`, fails with
    /// `ConcurrentModification` and changes nothing. Entering `Confirmed`
    /// clears `expires_at`; entering `Completed` stamps `completed_at`.
    ///
    /// Release states (`Cancelled`, `Expired`) are rejected here; they
    /// must go through [`release`](Self::release) so stock is returned.
    async fn transition(
        &self,
        reservation_id: ReservationId,
        expected: ReservationState,
        target: ReservationState,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Fetches a reservation by id.
    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>>;

    /// Fetches all reservations against a unit, oldest first.
    async fn reservations_for_unit(&self, unit_id: UnitId) -> Result<Vec<Reservation>>;

    /// Fetches a reservation's state-history log in sequence order.
    async fn history(&self, reservation_id: ReservationId) -> Result<Vec<StateHistoryEntry>>;

    /// Claims overdue `Pending` reservations for expiry processing.
    ///
    /// A reservation is claimable when `expires_at <= now` and it carries
    /// no claim younger than `lease`. The claim is an atomic conditional
    /// update: of any number of concurrent sweepers, at most one wins each
    /// reservation. Claims are leases, not tombstones — a sweeper that
    /// claims and then fails leaves the reservation claimable again once
    /// the lease lapses.
    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<ReservationId>>;

    /// Opens an idempotency window for `(key, operation)`.
    ///
    /// Atomically registers a placeholder if none exists (`Fresh`);
    /// otherwise reports the existing record as `InFlight` or
    /// `Completed`. A record whose TTL has lapsed is replaced and the
    /// caller gets `Fresh` again.
    async fn idempotency_begin(
        &self,
        key: &str,
        operation: OperationKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<IdempotencyBegin>;

    /// Completes an idempotency window, persisting the response snapshot.
    async fn idempotency_complete(
        &self,
        key: &str,
        operation: OperationKind,
        entity_id: Uuid,
        response: serde_json::Value,
    ) -> Result<()>;

    /// Discards an idempotency window without a result, so the key can
    /// be retried. Called when the guarded operation itself failed.
    async fn idempotency_remove(&self, key: &str, operation: OperationKind) -> Result<()>;

    /// Deletes idempotency records whose TTL has lapsed. Returns the
    /// number of records removed.
    async fn purge_idempotency(&self, now: DateTime<Utc>) -> Result<u64>;
}
