//! In-memory inventory store implementation for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use common::{ReservationId, UnitId};

use crate::entity::{
    IdempotencyRecord, InventoryUnit, NewInventoryUnit, NewReservation, Reservation,
    StateHistoryEntry, UnitStatus,
};
use crate::error::{Result, StoreError};
use crate::state::{Actor, ReservationState};
use crate::store::{
    IdempotencyBegin, InventoryStore, OperationKind, ReleaseOutcome, ReleaseReason, UnitFilter,
};

#[derive(Default)]
struct MemoryState {
    units: HashMap<UnitId, InventoryUnit>,
    reservations: HashMap<ReservationId, Reservation>,
    history: Vec<StateHistoryEntry>,
    next_seq: i64,
    idempotency: HashMap<(String, OperationKind), IdempotencyRecord>,
    fail_next_releases: usize,
}

impl MemoryState {
    fn record_history(
        &mut self,
        reservation_id: ReservationId,
        from_state: Option<ReservationState>,
        to_state: ReservationState,
        actor: Actor,
        recorded_at: DateTime<Utc>,
    ) {
        self.next_seq += 1;
        self.history.push(StateHistoryEntry {
            seq: self.next_seq,
            reservation_id,
            from_state,
            to_state,
            actor,
            recorded_at,
        });
    }
}

/// In-memory inventory store.
///
/// Provides the same observable semantics as the PostgreSQL
/// implementation; every trait method mutates under one write lock, which
/// is what makes each call an atomic unit of work.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of reservations ever created.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Number of stored idempotency records.
    pub async fn idempotency_count(&self) -> usize {
        self.state.read().await.idempotency.len()
    }

    /// Makes the next `count` release calls fail with `PoolExhausted`.
    /// Used to test that the sweeper survives per-reservation failures.
    pub async fn fail_next_releases(&self, count: usize) {
        self.state.write().await.fail_next_releases = count;
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn insert_unit(&self, unit: NewInventoryUnit) -> Result<InventoryUnit> {
        let mut state = self.state.write().await;
        let stored = InventoryUnit {
            id: unit.id,
            seller_id: unit.seller_id,
            total_quantity: unit.quantity,
            remaining_quantity: unit.quantity,
            status: UnitStatus::Active,
            published_at: unit.published_at,
            updated_at: unit.published_at,
        };
        state.units.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_unit(&self, unit_id: UnitId) -> Result<Option<InventoryUnit>> {
        Ok(self.state.read().await.units.get(&unit_id).cloned())
    }

    async fn list_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>> {
        let state = self.state.read().await;
        let mut units: Vec<_> = state
            .units
            .values()
            .filter(|u| u.status == UnitStatus::Active)
            .filter(|u| filter.include_sold_out || u.remaining_quantity > 0)
            .filter(|u| filter.seller_id.is_none_or(|s| u.seller_id == s))
            .cloned()
            .collect();
        units.sort_by_key(|u| (u.published_at, u.id.as_uuid()));
        Ok(units)
    }

    async fn set_unit_status(
        &self,
        unit_id: UnitId,
        status: UnitStatus,
        now: DateTime<Utc>,
    ) -> Result<InventoryUnit> {
        let mut state = self.state.write().await;
        let unit = state
            .units
            .get_mut(&unit_id)
            .ok_or(StoreError::UnitNotFound(unit_id))?;
        unit.status = status;
        unit.updated_at = now;
        Ok(unit.clone())
    }

    async fn reserve(&self, reservation: NewReservation) -> Result<Reservation> {
        let mut state = self.state.write().await;

        // The write lock stands in for the unit row lock: re-read,
        // check, decrement, insert all happen under it.
        let unit = state
            .units
            .get_mut(&reservation.unit_id)
            .ok_or(StoreError::UnitNotFound(reservation.unit_id))?;

        if unit.status != UnitStatus::Active {
            return Err(StoreError::UnitNotActive {
                unit_id: unit.id,
                status: unit.status,
            });
        }

        if unit.remaining_quantity < reservation.quantity {
            return Err(StoreError::InsufficientStock {
                unit_id: unit.id,
                requested: reservation.quantity,
                available: unit.remaining_quantity,
            });
        }

        unit.remaining_quantity -= reservation.quantity;
        unit.updated_at = reservation.created_at;

        let stored = Reservation {
            id: reservation.id,
            unit_id: reservation.unit_id,
            buyer_id: reservation.buyer_id,
            quantity: reservation.quantity,
            state: ReservationState::Pending,
            fulfillment: reservation.fulfillment,
            confirmation_code: reservation.confirmation_code,
            created_at: reservation.created_at,
            expires_at: reservation.expires_at,
            completed_at: None,
            cancelled_at: None,
            sweep_claimed_at: None,
        };
        state.reservations.insert(stored.id, stored.clone());
        state.record_history(
            stored.id,
            None,
            ReservationState::Pending,
            Actor::Buyer,
            stored.created_at,
        );

        Ok(stored)
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome> {
        let mut state = self.state.write().await;

        if state.fail_next_releases > 0 {
            state.fail_next_releases -= 1;
            return Err(StoreError::PoolExhausted);
        }

        let reservation = state
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;

        if reservation.is_terminal() {
            return Ok(ReleaseOutcome::AlreadyTerminal(reservation));
        }

        let from_state = reservation.state;
        let target = reason.target_state();

        let unit = state
            .units
            .get_mut(&reservation.unit_id)
            .ok_or(StoreError::UnitNotFound(reservation.unit_id))?;
        unit.remaining_quantity += reservation.quantity;
        unit.updated_at = now;

        let stored = state.reservations.get_mut(&reservation_id).unwrap();
        stored.state = target;
        stored.cancelled_at = Some(now);
        let updated = stored.clone();

        state.record_history(reservation_id, Some(from_state), target, reason.actor(), now);

        Ok(ReleaseOutcome::Released(updated))
    }

    async fn transition(
        &self,
        reservation_id: ReservationId,
        expected: ReservationState,
        target: ReservationState,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        if target.returns_stock() {
            return Err(StoreError::InvalidStateTransition {
                from: expected,
                to: target,
            });
        }

        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .get_mut(&reservation_id)
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;

        if reservation.state != expected {
            return Err(StoreError::ConcurrentModification {
                reservation_id,
                expected,
                actual: reservation.state,
            });
        }

        reservation.state = target;
        match target {
            ReservationState::Confirmed => reservation.expires_at = None,
            ReservationState::Completed => reservation.completed_at = Some(now),
            _ => {}
        }
        let updated = reservation.clone();

        state.record_history(reservation_id, Some(expected), target, actor, now);

        Ok(updated)
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self
            .state
            .read()
            .await
            .reservations
            .get(&reservation_id)
            .cloned())
    }

    async fn reservations_for_unit(&self, unit_id: UnitId) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.unit_id == unit_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.created_at, r.id.as_uuid()));
        Ok(reservations)
    }

    async fn history(&self, reservation_id: ReservationId) -> Result<Vec<StateHistoryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<ReservationId>> {
        let mut state = self.state.write().await;
        let lease_cutoff = now - lease;

        let mut overdue: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.is_overdue(now))
            .filter(|r| r.sweep_claimed_at.is_none_or(|claimed| claimed <= lease_cutoff))
            .map(|r| (r.expires_at, r.id))
            .collect();
        overdue.sort_by_key(|(expires_at, id)| (*expires_at, id.as_uuid()));

        let claimed: Vec<ReservationId> = overdue
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect();

        for id in &claimed {
            state.reservations.get_mut(id).unwrap().sweep_claimed_at = Some(now);
        }

        Ok(claimed)
    }

    async fn idempotency_begin(
        &self,
        key: &str,
        operation: OperationKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<IdempotencyBegin> {
        let mut state = self.state.write().await;
        let map_key = (key.to_string(), operation);

        if let Some(existing) = state.idempotency.get(&map_key)
            && existing.expires_at > now
        {
            if existing.completed {
                return Ok(IdempotencyBegin::Completed(existing.clone()));
            }
            return Ok(IdempotencyBegin::InFlight);
        }

        // No record, or the prior one's TTL lapsed: register a placeholder.
        state.idempotency.insert(
            map_key,
            IdempotencyRecord {
                key: key.to_string(),
                operation,
                entity_id: None,
                response: None,
                completed: false,
                created_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(IdempotencyBegin::Fresh)
    }

    async fn idempotency_complete(
        &self,
        key: &str,
        operation: OperationKind,
        entity_id: Uuid,
        response: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.idempotency.get_mut(&(key.to_string(), operation)) {
            record.entity_id = Some(entity_id);
            record.response = Some(response);
            record.completed = true;
        }
        Ok(())
    }

    async fn idempotency_remove(&self, key: &str, operation: OperationKind) -> Result<()> {
        self.state
            .write()
            .await
            .idempotency
            .remove(&(key.to_string(), operation));
        Ok(())
    }

    async fn purge_idempotency(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.idempotency.len();
        state.idempotency.retain(|_, r| r.expires_at > now);
        Ok((before - state.idempotency.len()) as u64)
    }
}
