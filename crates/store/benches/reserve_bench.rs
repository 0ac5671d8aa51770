use chrono::{Duration, Utc};
use criterion::{Criterion, criterion_group, criterion_main};

use common::{BuyerId, ConfirmationCode, ReservationId, SellerId, UnitId};
use store::{
    Actor, FulfillmentKind, InMemoryInventoryStore, InventoryStore, NewInventoryUnit,
    NewReservation, ReleaseReason,
};

fn make_reservation(unit_id: UnitId) -> NewReservation {
    let now = Utc::now();
    NewReservation {
        id: ReservationId::new(),
        unit_id,
        buyer_id: BuyerId::new(),
        quantity: 1,
        fulfillment: FulfillmentKind::Pickup,
        confirmation_code: ConfirmationCode::generate(),
        created_at: now,
        expires_at: Some(now + Duration::hours(2)),
    }
}

async fn make_unit(store: &InMemoryInventoryStore, quantity: i32) -> UnitId {
    store
        .insert_unit(NewInventoryUnit {
            id: UnitId::new(),
            seller_id: SellerId::new(),
            quantity,
            published_at: Utc::now(),
        })
        .await
        .unwrap()
        .id
}

fn bench_reserve_single(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/reserve_single", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                let unit_id = make_unit(&store, 1_000_000).await;
                store.reserve(make_reservation(unit_id)).await.unwrap();
            });
        });
    });
}

fn bench_reserve_batch_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/reserve_batch_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                let unit_id = make_unit(&store, 1_000_000).await;
                for _ in 0..100 {
                    store.reserve(make_reservation(unit_id)).await.unwrap();
                }
            });
        });
    });
}

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/reserve_release_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                let unit_id = make_unit(&store, 10).await;
                let reservation = store.reserve(make_reservation(unit_id)).await.unwrap();
                store
                    .release(
                        reservation.id,
                        ReleaseReason::Cancelled(Actor::Buyer),
                        Utc::now(),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_single,
    bench_reserve_batch_100,
    bench_reserve_release_cycle
);
criterion_main!(benches);
