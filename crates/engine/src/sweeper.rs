//! Expiry sweeper: reclaims lapsed pending holds.

use tokio::sync::watch;

use common::Clock;
use store::{InventoryStore, ReleaseOutcome, ReleaseReason};

use crate::error::Result;
use crate::service::ReservationService;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue reservations this pass claimed.
    pub claimed: usize,
    /// Claims successfully expired (stock reclaimed).
    pub expired: usize,
    /// Claims whose release failed; they retry after the claim lease.
    pub failures: usize,
    /// Lapsed idempotency records purged.
    pub idempotency_purged: u64,
}

/// Periodic background process that expires overdue pending
/// reservations and reclaims their stock.
///
/// Safe to run from any number of replicas at once: each pass claims
/// its reservations through an atomic conditional update before
/// releasing them, so overlapping sweepers never double-reclaim. An
/// individual reservation failing to release is logged and left for the
/// next interval; it never aborts the rest of the pass.
pub struct ExpirySweeper<S, C> {
    service: ReservationService<S, C>,
}

impl<S, C> ExpirySweeper<S, C>
where
    S: InventoryStore + Clone,
    C: Clock,
{
    /// Creates a sweeper driving releases through the given service, so
    /// expiry gets the same cache invalidation and notification side
    /// effects as any other release.
    pub fn new(service: ReservationService<S, C>) -> Self {
        Self { service }
    }

    /// Returns the service the sweeper drives.
    pub fn service(&self) -> &ReservationService<S, C> {
        &self.service
    }

    /// Runs one sweep pass.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.service.clock.now();
        let config = &self.service.config;

        let claimed = self
            .service
            .store
            .claim_expired(now, config.claim_lease, config.sweep_batch_limit)
            .await?;

        let mut report = SweepReport {
            claimed: claimed.len(),
            ..SweepReport::default()
        };

        for reservation_id in claimed {
            match self
                .service
                .release(reservation_id, ReleaseReason::Expired)
                .await
            {
                Ok(ReleaseOutcome::Released(_)) => {
                    report.expired += 1;
                    metrics::counter!("sweeper_expired_total").increment(1);
                }
                // Another writer (a concurrent cancel, or a sweeper from a
                // previous lease) beat us to the terminal state.
                Ok(ReleaseOutcome::AlreadyTerminal(_)) => {}
                Err(error) => {
                    report.failures += 1;
                    metrics::counter!("sweeper_failures_total").increment(1);
                    tracing::warn!(%reservation_id, %error, "failed to expire reservation, will retry next pass");
                }
            }
        }

        match self.service.store.purge_idempotency(now).await {
            Ok(purged) => report.idempotency_purged = purged,
            Err(error) => {
                tracing::warn!(%error, "failed to purge idempotency records");
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                claimed = report.claimed,
                expired = report.expired,
                failures = report.failures,
                idempotency_purged = report.idempotency_purged,
                "sweep pass complete"
            );
        }

        Ok(report)
    }

    /// Drives [`sweep_once`](Self::sweep_once) on the configured fixed
    /// interval until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.service.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::error!(%error, "sweep pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("sweeper shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cache::HybridCache;
    use chrono::{Duration, Utc};
    use common::{BuyerId, FixedClock, SellerId};
    use store::{FulfillmentKind, InMemoryInventoryStore, ReservationState};

    use super::*;
    use crate::config::EngineConfig;
    use crate::notify::NoopNotifier;
    use crate::service::{PublishRequest, ReserveRequest};

    fn service_over(
        store: InMemoryInventoryStore,
        clock: FixedClock,
    ) -> ReservationService<InMemoryInventoryStore, FixedClock> {
        ReservationService::new(
            store,
            HybridCache::local_only(std::time::Duration::from_secs(60)),
            Arc::new(NoopNotifier),
            clock,
            EngineConfig::default(),
        )
    }

    async fn pending_reservation(
        service: &ReservationService<InMemoryInventoryStore, FixedClock>,
    ) -> (common::UnitId, common::ReservationId) {
        let unit = service
            .publish(PublishRequest {
                seller_id: SellerId::new(),
                quantity: 5,
            })
            .await
            .unwrap();
        let reservation = service
            .reserve(ReserveRequest {
                unit_id: unit.id,
                buyer_id: BuyerId::new(),
                quantity: 2,
                fulfillment: FulfillmentKind::Pickup,
                idempotency_key: None,
            })
            .await
            .unwrap();
        (unit.id, reservation.id)
    }

    #[tokio::test]
    async fn overdue_pending_reservation_is_expired_and_stock_reclaimed() {
        let store = InMemoryInventoryStore::new();
        let clock = FixedClock::at(Utc::now());
        let service = service_over(store.clone(), clock.clone());
        let (unit_id, reservation_id) = pending_reservation(&service).await;

        // Inside the hold window nothing happens.
        let sweeper = ExpirySweeper::new(service);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.claimed, 0);

        // Past the two-hour hold the reservation expires.
        clock.advance(Duration::hours(3));
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(report.failures, 0);

        let reservation = store.get_reservation(reservation_id).await.unwrap().unwrap();
        assert_eq!(reservation.state, ReservationState::Expired);

        let unit = store.get_unit(unit_id).await.unwrap().unwrap();
        assert_eq!(unit.remaining_quantity, 5);
    }

    #[tokio::test]
    async fn confirmed_reservations_never_expire() {
        let store = InMemoryInventoryStore::new();
        let clock = FixedClock::at(Utc::now());
        let service = service_over(store.clone(), clock.clone());
        let (_, reservation_id) = pending_reservation(&service).await;

        service
            .transition(reservation_id, ReservationState::Confirmed, store::Actor::Seller)
            .await
            .unwrap();

        clock.advance(Duration::hours(30));
        let sweeper = ExpirySweeper::new(service);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.claimed, 0);

        let reservation = store.get_reservation(reservation_id).await.unwrap().unwrap();
        assert_eq!(reservation.state, ReservationState::Confirmed);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_pass() {
        let store = InMemoryInventoryStore::new();
        let clock = FixedClock::at(Utc::now());
        let service = service_over(store.clone(), clock.clone());

        for _ in 0..3 {
            pending_reservation(&service).await;
        }

        clock.advance(Duration::hours(3));
        store.fail_next_releases(1).await;

        let sweeper = ExpirySweeper::new(service);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.expired, 2);
        assert_eq!(report.failures, 1);

        // The failed claim comes back once its lease lapses.
        clock.advance(Duration::minutes(6));
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.expired, 1);
    }

    #[tokio::test]
    async fn sweep_purges_lapsed_idempotency_records() {
        let store = InMemoryInventoryStore::new();
        let clock = FixedClock::at(Utc::now());
        let service = service_over(store.clone(), clock.clone());

        let unit = service
            .publish(PublishRequest {
                seller_id: SellerId::new(),
                quantity: 5,
            })
            .await
            .unwrap();
        service
            .reserve(ReserveRequest {
                unit_id: unit.id,
                buyer_id: BuyerId::new(),
                quantity: 1,
                fulfillment: FulfillmentKind::Pickup,
                idempotency_key: Some("checkout-1".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(store.idempotency_count().await, 1);

        clock.advance(Duration::hours(25));
        let sweeper = ExpirySweeper::new(service);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.idempotency_purged, 1);
        assert_eq!(store.idempotency_count().await, 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let store = InMemoryInventoryStore::new();
        let clock = FixedClock::at(Utc::now());
        let service = service_over(store, clock);
        let sweeper = ExpirySweeper::new(service);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { sweeper.run(rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
    }
}
