//! Reservation service: the engine's public operations.
//!
//! All correctness-critical exclusion lives in the store's units of
//! work; this layer validates input, drives the state machine, and runs
//! the post-commit side effects (cache invalidation, idempotency
//! completion, notification) that must never happen under the row lock.

use std::sync::Arc;

use cache::HybridCache;
use common::{BuyerId, Clock, ConfirmationCode, ReservationId, SellerId, UnitId};
use store::{
    Actor, FulfillmentKind, InventoryStore, InventoryUnit, NewInventoryUnit, NewReservation,
    OperationKind, ReleaseOutcome, ReleaseReason, Reservation, ReservationState,
    StateHistoryEntry, UnitStatus, actor_may_drive,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::idempotency::{Guarded, IdempotencyGuard};
use crate::keys;
use crate::notify::{Notification, Notifier, recipient_for};

/// Input for creating a reservation.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub unit_id: UnitId,
    pub buyer_id: BuyerId,
    pub quantity: i32,
    pub fulfillment: FulfillmentKind,
    /// Client-supplied key; retried requests carrying the same key
    /// replay the first result instead of reserving twice.
    pub idempotency_key: Option<String>,
}

/// Input for publishing a new inventory unit.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub seller_id: SellerId,
    pub quantity: i32,
}

/// Service for creating reservations and driving them through their
/// lifecycle.
///
/// Stateless over its store: any number of replicas may run against the
/// same backing store, coordinated only by the store's row locks. Every
/// dependency comes in through the constructor.
pub struct ReservationService<S, C> {
    pub(crate) store: S,
    pub(crate) guard: IdempotencyGuard<S>,
    pub(crate) cache: HybridCache,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: C,
    pub(crate) config: EngineConfig,
}

impl<S, C> ReservationService<S, C>
where
    S: InventoryStore + Clone,
    C: Clock,
{
    /// Creates a new reservation service.
    pub fn new(
        store: S,
        cache: HybridCache,
        notifier: Arc<dyn Notifier>,
        clock: C,
        config: EngineConfig,
    ) -> Self {
        let guard = IdempotencyGuard::new(store.clone(), config.idempotency_ttl);
        Self {
            store,
            guard,
            cache,
            notifier,
            clock,
            config,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Publishes a new inventory unit for a seller.
    #[tracing::instrument(skip(self))]
    pub async fn publish(&self, request: PublishRequest) -> Result<InventoryUnit> {
        if request.quantity < 1 {
            return Err(EngineError::InvalidArgument(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }

        let unit = self
            .store
            .insert_unit(NewInventoryUnit {
                id: UnitId::new(),
                seller_id: request.seller_id,
                quantity: request.quantity,
                published_at: self.clock.now(),
            })
            .await?;

        metrics::counter!("units_published_total").increment(1);
        tracing::info!(unit_id = %unit.id, quantity = unit.total_quantity, "unit published");

        self.cache.invalidate_prefix(keys::LISTING_PREFIX).await;
        Ok(unit)
    }

    /// Withdraws a unit from sale. Existing reservations are untouched;
    /// pending ones run out through confirmation, cancellation, or expiry.
    #[tracing::instrument(skip(self))]
    pub async fn withdraw(&self, unit_id: UnitId) -> Result<InventoryUnit> {
        let unit = self
            .store
            .set_unit_status(unit_id, UnitStatus::Withdrawn, self.clock.now())
            .await?;

        tracing::info!(unit_id = %unit.id, "unit withdrawn");
        self.invalidate_unit_reads(unit_id).await;
        Ok(unit)
    }

    /// Reserves `quantity` units against an inventory unit.
    ///
    /// Under any number of concurrent calls against remaining quantity Q,
    /// exactly the calls whose cumulative total is at most Q succeed, in
    /// commit order; the rest see `InsufficientStock`. Retried calls
    /// carrying the same idempotency key replay the original result.
    #[tracing::instrument(skip(self), fields(unit_id = %request.unit_id))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation> {
        if request.quantity < 1 {
            return Err(EngineError::InvalidArgument(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }

        let now = self.clock.now();

        if let Some(key) = &request.idempotency_key
            && let Guarded::Replayed(prior) = self
                .guard
                .begin::<Reservation>(key, OperationKind::Reserve, now)
                .await?
        {
            tracing::debug!(reservation_id = %prior.id, "replayed reservation from idempotency record");
            return Ok(prior);
        }

        let reservation = NewReservation {
            id: ReservationId::new(),
            unit_id: request.unit_id,
            buyer_id: request.buyer_id,
            quantity: request.quantity,
            fulfillment: request.fulfillment,
            confirmation_code: ConfirmationCode::generate(),
            created_at: now,
            expires_at: Some(now + self.config.hold_ttl),
        };

        let reservation = match self.store.reserve(reservation).await {
            Ok(reservation) => reservation,
            Err(error) => {
                // Hand the key back so the client may retry after a
                // legitimate failure.
                if let Some(key) = &request.idempotency_key
                    && let Err(abort_error) = self.guard.abort(key, OperationKind::Reserve).await
                {
                    tracing::warn!(key = %key, error = %abort_error, "failed to discard idempotency placeholder");
                }
                return Err(error.into());
            }
        };

        metrics::counter!("reservations_created_total").increment(1);
        tracing::info!(
            reservation_id = %reservation.id,
            quantity = reservation.quantity,
            fulfillment = %reservation.fulfillment,
            "reservation created"
        );

        // Post-commit side effects; none may fail the call.
        self.invalidate_unit_reads(reservation.unit_id).await;
        if let Some(key) = &request.idempotency_key
            && let Err(error) = self
                .guard
                .complete(key, OperationKind::Reserve, reservation.id.as_uuid(), &reservation)
                .await
        {
            tracing::warn!(key = %key, %error, "failed to persist idempotency result");
        }
        self.notify(&reservation, Actor::Buyer).await;

        Ok(reservation)
    }

    /// Releases a reservation, returning its quantity to the unit.
    ///
    /// Idempotent: a reservation that is already terminal is left
    /// untouched and reported as such.
    #[tracing::instrument(skip(self))]
    pub async fn release(
        &self,
        reservation_id: ReservationId,
        reason: ReleaseReason,
    ) -> Result<ReleaseOutcome> {
        let outcome = self
            .store
            .release(reservation_id, reason, self.clock.now())
            .await?;

        if let ReleaseOutcome::Released(reservation) = &outcome {
            metrics::counter!(
                "reservations_released_total",
                "reason" => reason.target_state().as_str()
            )
            .increment(1);
            tracing::info!(
                %reservation_id,
                state = %reservation.state,
                quantity = reservation.quantity,
                "reservation released"
            );

            self.invalidate_unit_reads(reservation.unit_id).await;
            self.cache.invalidate(&keys::reservation(reservation_id)).await;
            self.notify(reservation, reason.actor()).await;
        }

        Ok(outcome)
    }

    /// Advances a reservation to `target`.
    ///
    /// The move must be a legal edge for the reservation's fulfillment
    /// kind and the actor must be entitled to drive it. The store applies
    /// the change only if the state has not moved underneath the caller;
    /// a loser gets `ConcurrentModification` and should reload.
    #[tracing::instrument(skip(self))]
    pub async fn transition(
        &self,
        reservation_id: ReservationId,
        target: ReservationState,
        actor: Actor,
    ) -> Result<Reservation> {
        let current = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(EngineError::NotFound {
                entity: "reservation",
                id: reservation_id.to_string(),
            })?;

        if !current.fulfillment.permits(current.state, target) {
            return Err(EngineError::InvalidStateTransition {
                from: current.state,
                to: target,
            });
        }
        if !actor_may_drive(current.fulfillment, target, actor) {
            return Err(EngineError::InvalidArgument(format!(
                "{actor} may not move a {} reservation to {target}",
                current.fulfillment
            )));
        }

        // Moves that return stock ride the release path.
        if target.returns_stock() {
            let reason = match target {
                ReservationState::Expired => ReleaseReason::Expired,
                _ => ReleaseReason::Cancelled(actor),
            };
            let outcome = self.release(reservation_id, reason).await?;
            return Ok(outcome.reservation().clone());
        }

        let updated = self
            .store
            .transition(reservation_id, current.state, target, actor, self.clock.now())
            .await?;

        metrics::counter!("reservation_transitions_total", "to" => target.as_str()).increment(1);
        tracing::info!(%reservation_id, from = %current.state, to = %target, "reservation advanced");

        self.cache.invalidate(&keys::reservation(reservation_id)).await;
        self.notify(&updated, actor).await;

        Ok(updated)
    }

    /// Completes a pickup reservation against the code the buyer
    /// presented at the counter.
    #[tracing::instrument(skip(self, presented_code))]
    pub async fn complete_pickup(
        &self,
        reservation_id: ReservationId,
        presented_code: &str,
    ) -> Result<Reservation> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(EngineError::NotFound {
                entity: "reservation",
                id: reservation_id.to_string(),
            })?;

        if reservation.fulfillment != FulfillmentKind::Pickup {
            return Err(EngineError::InvalidArgument(
                "not a pickup reservation".to_string(),
            ));
        }
        if !reservation.confirmation_code.matches(presented_code) {
            return Err(EngineError::InvalidArgument(
                "confirmation code does not match".to_string(),
            ));
        }

        self.transition(reservation_id, ReservationState::Completed, Actor::Seller)
            .await
    }

    /// Fetches a reservation, serving cached reads where possible.
    pub async fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let key = keys::reservation(reservation_id);
        if let Some(cached) = self.cache.get::<Reservation>(&key).await {
            return Ok(cached);
        }

        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(EngineError::NotFound {
                entity: "reservation",
                id: reservation_id.to_string(),
            })?;

        self.cache.put(&key, &reservation).await;
        Ok(reservation)
    }

    /// Fetches a reservation's state-history log.
    pub async fn history(&self, reservation_id: ReservationId) -> Result<Vec<StateHistoryEntry>> {
        Ok(self.store.history(reservation_id).await?)
    }

    pub(crate) async fn invalidate_unit_reads(&self, unit_id: UnitId) {
        self.cache.invalidate(&keys::unit(unit_id)).await;
        self.cache.invalidate_prefix(keys::LISTING_PREFIX).await;
    }

    pub(crate) async fn notify(&self, reservation: &Reservation, actor: Actor) {
        self.notifier
            .dispatch(Notification {
                reservation_id: reservation.id,
                new_state: reservation.state,
                recipient_role: recipient_for(reservation.state, actor),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NoopNotifier, RecipientRole, RecordingNotifier};
    use chrono::Utc;
    use common::FixedClock;
    use store::InMemoryInventoryStore;

    fn service_with(
        notifier: Arc<dyn Notifier>,
    ) -> ReservationService<InMemoryInventoryStore, FixedClock> {
        ReservationService::new(
            InMemoryInventoryStore::new(),
            HybridCache::local_only(std::time::Duration::from_secs(60)),
            notifier,
            FixedClock::at(Utc::now()),
            EngineConfig::default(),
        )
    }

    fn service() -> ReservationService<InMemoryInventoryStore, FixedClock> {
        service_with(Arc::new(NoopNotifier))
    }

    async fn published_unit(
        service: &ReservationService<InMemoryInventoryStore, FixedClock>,
        quantity: i32,
    ) -> InventoryUnit {
        service
            .publish(PublishRequest {
                seller_id: SellerId::new(),
                quantity,
            })
            .await
            .unwrap()
    }

    fn reserve_request(unit_id: UnitId, quantity: i32) -> ReserveRequest {
        ReserveRequest {
            unit_id,
            buyer_id: BuyerId::new(),
            quantity,
            fulfillment: FulfillmentKind::Pickup,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn reserve_rejects_non_positive_quantity() {
        let service = service();
        let unit = published_unit(&service, 5).await;

        for quantity in [0, -2] {
            let result = service.reserve(reserve_request(unit.id, quantity)).await;
            assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn reserve_sets_hold_deadline_from_config() {
        let service = service();
        let unit = published_unit(&service, 5).await;

        let reservation = service.reserve(reserve_request(unit.id, 2)).await.unwrap();
        let expected = service.clock.now() + service.config.hold_ttl;
        assert_eq!(reservation.expires_at, Some(expected));
        assert_eq!(reservation.state, ReservationState::Pending);
    }

    #[tokio::test]
    async fn idempotent_retry_replays_the_same_reservation() {
        let service = service();
        let unit = published_unit(&service, 5).await;

        let mut request = reserve_request(unit.id, 2);
        request.idempotency_key = Some("checkout-42".to_string());

        let first = service.reserve(request.clone()).await.unwrap();
        let replay = service.reserve(request).await.unwrap();

        assert_eq!(first.id, replay.id);
        assert_eq!(first.confirmation_code, replay.confirmation_code);
        assert_eq!(service.store().reservation_count().await, 1);

        // Stock was only taken once.
        let unit = service.store().get_unit(unit.id).await.unwrap().unwrap();
        assert_eq!(unit.remaining_quantity, 3);
    }

    #[tokio::test]
    async fn failed_reserve_returns_the_idempotency_key() {
        let service = service();
        let unit = published_unit(&service, 1).await;

        let mut request = reserve_request(unit.id, 5);
        request.idempotency_key = Some("checkout-43".to_string());

        let result = service.reserve(request).await;
        assert!(matches!(result, Err(EngineError::InsufficientStock { .. })));

        // The same key works once stock allows it.
        let mut retry = reserve_request(unit.id, 1);
        retry.idempotency_key = Some("checkout-43".to_string());
        service.reserve(retry).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_rides_the_release_path() {
        let notifier = RecordingNotifier::new();
        let service = service_with(Arc::new(notifier.clone()));
        let unit = published_unit(&service, 5).await;
        let reservation = service.reserve(reserve_request(unit.id, 3)).await.unwrap();

        let cancelled = service
            .transition(reservation.id, ReservationState::Cancelled, Actor::Buyer)
            .await
            .unwrap();
        assert_eq!(cancelled.state, ReservationState::Cancelled);

        let unit = service.store().get_unit(unit.id).await.unwrap().unwrap();
        assert_eq!(unit.remaining_quantity, 5);

        // Buyer-driven cancellation notifies the seller.
        let last = notifier.sent().pop().unwrap();
        assert_eq!(last.new_state, ReservationState::Cancelled);
        assert_eq!(last.recipient_role, RecipientRole::Seller);
    }

    #[tokio::test]
    async fn terminal_reservations_reject_further_moves() {
        let service = service();
        let unit = published_unit(&service, 5).await;
        let reservation = service.reserve(reserve_request(unit.id, 1)).await.unwrap();

        service
            .transition(reservation.id, ReservationState::Confirmed, Actor::Seller)
            .await
            .unwrap();
        service
            .transition(reservation.id, ReservationState::Completed, Actor::Seller)
            .await
            .unwrap();

        let result = service
            .transition(reservation.id, ReservationState::Confirmed, Actor::Seller)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidStateTransition {
                from: ReservationState::Completed,
                to: ReservationState::Confirmed,
            })
        ));

        // State is unchanged.
        let reloaded = service.get(reservation.id).await.unwrap();
        assert_eq!(reloaded.state, ReservationState::Completed);
    }

    #[tokio::test]
    async fn delivery_must_walk_every_stage() {
        let service = service();
        let unit = published_unit(&service, 5).await;

        let mut request = reserve_request(unit.id, 1);
        request.fulfillment = FulfillmentKind::Delivery;
        let reservation = service.reserve(request).await.unwrap();

        service
            .transition(reservation.id, ReservationState::Confirmed, Actor::Seller)
            .await
            .unwrap();

        // Skipping Preparing/Ready/Delivering is illegal for delivery.
        let result = service
            .transition(reservation.id, ReservationState::Completed, Actor::Courier)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidStateTransition { .. })
        ));

        for (target, actor) in [
            (ReservationState::Preparing, Actor::Seller),
            (ReservationState::Ready, Actor::Seller),
            (ReservationState::Delivering, Actor::Courier),
            (ReservationState::Completed, Actor::Courier),
        ] {
            service.transition(reservation.id, target, actor).await.unwrap();
        }

        let done = service.get(reservation.id).await.unwrap();
        assert_eq!(done.state, ReservationState::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn wrong_actor_is_rejected() {
        let service = service();
        let unit = published_unit(&service, 5).await;
        let reservation = service.reserve(reserve_request(unit.id, 1)).await.unwrap();

        let result = service
            .transition(reservation.id, ReservationState::Confirmed, Actor::Buyer)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn complete_pickup_checks_the_code() {
        let service = service();
        let unit = published_unit(&service, 5).await;
        let reservation = service.reserve(reserve_request(unit.id, 1)).await.unwrap();
        service
            .transition(reservation.id, ReservationState::Confirmed, Actor::Seller)
            .await
            .unwrap();

        let result = service.complete_pickup(reservation.id, "WRONG1").await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

        let code = reservation.confirmation_code.as_str().to_string();
        let completed = service.complete_pickup(reservation.id, &code).await.unwrap();
        assert_eq!(completed.state, ReservationState::Completed);
    }

    #[tokio::test]
    async fn withdrawn_unit_reads_as_not_found_to_buyers() {
        let service = service();
        let unit = published_unit(&service, 5).await;
        service.withdraw(unit.id).await.unwrap();

        let result = service.reserve(reserve_request(unit.id, 1)).await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn pool_saturation_surfaces_as_resource_exhausted() {
        let service = service();
        let unit = published_unit(&service, 5).await;
        let reservation = service.reserve(reserve_request(unit.id, 1)).await.unwrap();

        service.store().fail_next_releases(1).await;
        let result = service
            .release(reservation.id, ReleaseReason::Cancelled(Actor::Buyer))
            .await;
        assert!(matches!(result, Err(EngineError::ResourceExhausted)));
    }

    #[tokio::test]
    async fn get_misses_then_serves_from_cache() {
        let service = service();
        let unit = published_unit(&service, 5).await;
        let reservation = service.reserve(reserve_request(unit.id, 1)).await.unwrap();

        let first = service.get(reservation.id).await.unwrap();
        let second = service.get(reservation.id).await.unwrap();
        assert_eq!(first, second);

        let missing = service.get(ReservationId::new()).await;
        assert!(matches!(missing, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn notifications_follow_the_lifecycle() {
        let notifier = RecordingNotifier::new();
        let service = service_with(Arc::new(notifier.clone()));
        let unit = published_unit(&service, 5).await;

        let reservation = service.reserve(reserve_request(unit.id, 1)).await.unwrap();
        service
            .transition(reservation.id, ReservationState::Confirmed, Actor::Seller)
            .await
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].new_state, ReservationState::Pending);
        assert_eq!(sent[0].recipient_role, RecipientRole::Seller);
        assert_eq!(sent[1].new_state, ReservationState::Confirmed);
        assert_eq!(sent[1].recipient_role, RecipientRole::Buyer);
    }
}
