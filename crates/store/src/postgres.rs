//! PostgreSQL-backed inventory store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{BuyerId, ConfirmationCode, ReservationId, SellerId, UnitId};

use crate::entity::{
    IdempotencyRecord, InventoryUnit, NewInventoryUnit, NewReservation, Reservation,
    StateHistoryEntry, UnitStatus,
};
use crate::error::{Result, StoreError};
use crate::state::{Actor, ReservationState};
use crate::store::{
    IdempotencyBegin, InventoryStore, OperationKind, ReleaseOutcome, ReleaseReason, UnitFilter,
};

const RESERVATION_COLUMNS: &str = "id, unit_id, buyer_id, quantity, state, fulfillment, \
     confirmation_code, created_at, expires_at, completed_at, cancelled_at, sweep_claimed_at";

const UNIT_COLUMNS: &str =
    "id, seller_id, total_quantity, remaining_quantity, status, published_at, updated_at";

/// PostgreSQL inventory store.
///
/// Exclusive access to a unit row is taken with `SELECT ... FOR UPDATE`
/// inside a transaction; each trait method is exactly one transaction.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_unit(row: PgRow) -> Result<InventoryUnit> {
        let status: String = row.try_get("status")?;
        Ok(InventoryUnit {
            id: UnitId::from_uuid(row.try_get::<Uuid, _>("id")?),
            seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            total_quantity: row.try_get("total_quantity")?,
            remaining_quantity: row.try_get("remaining_quantity")?,
            status: UnitStatus::parse(&status).ok_or(StoreError::Decode {
                column: "status",
                value: status,
            })?,
            published_at: row.try_get("published_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let state: String = row.try_get("state")?;
        let fulfillment: String = row.try_get("fulfillment")?;
        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            unit_id: UnitId::from_uuid(row.try_get::<Uuid, _>("unit_id")?),
            buyer_id: BuyerId::from_uuid(row.try_get::<Uuid, _>("buyer_id")?),
            quantity: row.try_get("quantity")?,
            state: ReservationState::parse(&state).ok_or(StoreError::Decode {
                column: "state",
                value: state,
            })?,
            fulfillment: crate::state::FulfillmentKind::parse(&fulfillment).ok_or(
                StoreError::Decode {
                    column: "fulfillment",
                    value: fulfillment,
                },
            )?,
            confirmation_code: ConfirmationCode::from_string(
                row.try_get::<String, _>("confirmation_code")?,
            ),
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            sweep_claimed_at: row.try_get("sweep_claimed_at")?,
        })
    }

    fn row_to_history(row: PgRow) -> Result<StateHistoryEntry> {
        let from_state: Option<String> = row.try_get("from_state")?;
        let to_state: String = row.try_get("to_state")?;
        let actor: String = row.try_get("actor")?;
        Ok(StateHistoryEntry {
            seq: row.try_get("seq")?,
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
            from_state: from_state
                .map(|s| {
                    ReservationState::parse(&s).ok_or(StoreError::Decode {
                        column: "from_state",
                        value: s,
                    })
                })
                .transpose()?,
            to_state: ReservationState::parse(&to_state).ok_or(StoreError::Decode {
                column: "to_state",
                value: to_state,
            })?,
            actor: Actor::parse(&actor).ok_or(StoreError::Decode {
                column: "actor",
                value: actor,
            })?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn row_to_idempotency(row: PgRow) -> Result<IdempotencyRecord> {
        let operation: String = row.try_get("operation")?;
        Ok(IdempotencyRecord {
            key: row.try_get("key")?,
            operation: OperationKind::parse(&operation).ok_or(StoreError::Decode {
                column: "operation",
                value: operation,
            })?,
            entity_id: row.try_get("entity_id")?,
            response: row.try_get("response")?,
            completed: row.try_get("completed")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// Maps pool saturation to its own error kind so callers can back off.
fn map_db(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut => StoreError::PoolExhausted,
        other => StoreError::Database(other),
    }
}

async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    reservation_id: ReservationId,
    from_state: Option<ReservationState>,
    to_state: ReservationState,
    actor: Actor,
    recorded_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reservation_history (reservation_id, from_state, to_state, actor, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(reservation_id.as_uuid())
    .bind(from_state.map(|s| s.as_str()))
    .bind(to_state.as_str())
    .bind(actor.as_str())
    .bind(recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn insert_unit(&self, unit: NewInventoryUnit) -> Result<InventoryUnit> {
        sqlx::query(
            r#"
            INSERT INTO inventory_units
                (id, seller_id, total_quantity, remaining_quantity, status, published_at, updated_at)
            VALUES ($1, $2, $3, $3, 'active', $4, $4)
            "#,
        )
        .bind(unit.id.as_uuid())
        .bind(unit.seller_id.as_uuid())
        .bind(unit.quantity)
        .bind(unit.published_at)
        .execute(&self.pool)
        .await
        .map_err(map_db)?;

        Ok(InventoryUnit {
            id: unit.id,
            seller_id: unit.seller_id,
            total_quantity: unit.quantity,
            remaining_quantity: unit.quantity,
            status: UnitStatus::Active,
            published_at: unit.published_at,
            updated_at: unit.published_at,
        })
    }

    async fn get_unit(&self, unit_id: UnitId) -> Result<Option<InventoryUnit>> {
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM inventory_units WHERE id = $1"
        ))
        .bind(unit_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db)?;

        row.map(Self::row_to_unit).transpose()
    }

    async fn list_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {UNIT_COLUMNS} FROM inventory_units
            WHERE status = 'active'
              AND (remaining_quantity > 0 OR $1)
              AND ($2::uuid IS NULL OR seller_id = $2)
            ORDER BY published_at, id
            "#
        ))
        .bind(filter.include_sold_out)
        .bind(filter.seller_id.map(|s| s.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db)?;

        rows.into_iter().map(Self::row_to_unit).collect()
    }

    async fn set_unit_status(
        &self,
        unit_id: UnitId,
        status: UnitStatus,
        now: DateTime<Utc>,
    ) -> Result<InventoryUnit> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE inventory_units SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING {UNIT_COLUMNS}
            "#
        ))
        .bind(unit_id.as_uuid())
        .bind(status.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db)?;

        row.map(Self::row_to_unit)
            .transpose()?
            .ok_or(StoreError::UnitNotFound(unit_id))
    }

    async fn reserve(&self, reservation: NewReservation) -> Result<Reservation> {
        let mut tx = self.pool.begin().await.map_err(map_db)?;

        // Exclusive lock on the one unit row; concurrent reservations
        // and releases against this unit queue here.
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM inventory_units WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation.unit_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let unit = row
            .map(Self::row_to_unit)
            .transpose()?
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

        sqlx::query(
            "UPDATE inventory_units SET remaining_quantity = remaining_quantity - $2, updated_at = $3 WHERE id = $1",
        )
        .bind(unit.id.as_uuid())
        .bind(reservation.quantity)
        .bind(reservation.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO reservations
                (id, unit_id, buyer_id, quantity, state, fulfillment, confirmation_code,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.unit_id.as_uuid())
        .bind(reservation.buyer_id.as_uuid())
        .bind(reservation.quantity)
        .bind(reservation.fulfillment.as_str())
        .bind(reservation.confirmation_code.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await?;

        insert_history(
            &mut tx,
            reservation.id,
            None,
            ReservationState::Pending,
            Actor::Buyer,
            reservation.created_at,
        )
        .await?;

        tx.commit().await?;

        Ok(Reservation {
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
        })
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_db)?;

        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let reservation = row
            .map(Self::row_to_reservation)
            .transpose()?
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;

        if reservation.is_terminal() {
            return Ok(ReleaseOutcome::AlreadyTerminal(reservation));
        }

        let target = reason.target_state();

        sqlx::query(
            "UPDATE inventory_units SET remaining_quantity = remaining_quantity + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(reservation.unit_id.as_uuid())
        .bind(reservation.quantity)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE reservations SET state = $2, cancelled_at = $3
            WHERE id = $1
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(reservation_id.as_uuid())
        .bind(target.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let updated = Self::row_to_reservation(row)?;

        insert_history(
            &mut tx,
            reservation_id,
            Some(reservation.state),
            target,
            reason.actor(),
            now,
        )
        .await?;

        tx.commit().await?;

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

        let mut tx = self.pool.begin().await.map_err(map_db)?;

        // Optimistic guard: the update only applies while the stored
        // state still matches the caller's expected pre-state.
        let row = sqlx::query(&format!(
            r#"
            UPDATE reservations
            SET state = $3,
                expires_at = CASE WHEN $3 = 'confirmed' THEN NULL ELSE expires_at END,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END
            WHERE id = $1 AND state = $2
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(reservation_id.as_uuid())
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT state FROM reservations WHERE id = $1")
                    .bind(reservation_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

            return match actual {
                None => Err(StoreError::ReservationNotFound(reservation_id)),
                Some(actual) => {
                    let actual = ReservationState::parse(&actual).ok_or(StoreError::Decode {
                        column: "state",
                        value: actual,
                    })?;
                    Err(StoreError::ConcurrentModification {
                        reservation_id,
                        expected,
                        actual,
                    })
                }
            };
        };
        let updated = Self::row_to_reservation(row)?;

        insert_history(&mut tx, reservation_id, Some(expected), target, actor, now).await?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db)?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn reservations_for_unit(&self, unit_id: UnitId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE unit_id = $1 ORDER BY created_at, id"
        ))
        .bind(unit_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db)?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn history(&self, reservation_id: ReservationId) -> Result<Vec<StateHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, reservation_id, from_state, to_state, actor, recorded_at
            FROM reservation_history
            WHERE reservation_id = $1
            ORDER BY seq
            "#,
        )
        .bind(reservation_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db)?;

        rows.into_iter().map(Self::row_to_history).collect()
    }

    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<ReservationId>> {
        // SKIP LOCKED keeps overlapping sweepers from queueing on each
        // other's candidate rows; the claim timestamp itself is the lease.
        let rows = sqlx::query(
            r#"
            UPDATE reservations
            SET sweep_claimed_at = $1
            WHERE id IN (
                SELECT id FROM reservations
                WHERE state = 'pending'
                  AND expires_at IS NOT NULL
                  AND expires_at <= $1
                  AND (sweep_claimed_at IS NULL OR sweep_claimed_at <= $2)
                ORDER BY expires_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(now - lease)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db)?;

        let claimed: Vec<ReservationId> = rows
            .into_iter()
            .map(|row| Ok(ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?)))
            .collect::<Result<_>>()?;

        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), "claimed overdue reservations");
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
        // First writer under a (key, operation) registers the placeholder.
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, operation, completed, created_at, expires_at)
            VALUES ($1, $2, FALSE, $3, $4)
            ON CONFLICT (key, operation) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(operation.as_str())
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db)?;

        if inserted.is_some() {
            return Ok(IdempotencyBegin::Fresh);
        }

        // A record exists. If its TTL lapsed, exactly one caller takes it
        // over; everyone else sees the refreshed placeholder as in-flight.
        let taken_over = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET completed = FALSE, entity_id = NULL, response = NULL,
                created_at = $3, expires_at = $4
            WHERE key = $1 AND operation = $2 AND expires_at <= $3
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(operation.as_str())
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db)?;

        if taken_over.is_some() {
            return Ok(IdempotencyBegin::Fresh);
        }

        let row = sqlx::query(
            r#"
            SELECT key, operation, entity_id, response, completed, created_at, expires_at
            FROM idempotency_records
            WHERE key = $1 AND operation = $2
            "#,
        )
        .bind(key)
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db)?;

        match row.map(Self::row_to_idempotency).transpose()? {
            Some(record) if record.completed => Ok(IdempotencyBegin::Completed(record)),
            // Live placeholder, or the record vanished between statements;
            // either way the caller should retry shortly.
            _ => Ok(IdempotencyBegin::InFlight),
        }
    }

    async fn idempotency_complete(
        &self,
        key: &str,
        operation: OperationKind,
        entity_id: Uuid,
        response: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_records
            SET entity_id = $3, response = $4, completed = TRUE
            WHERE key = $1 AND operation = $2
            "#,
        )
        .bind(key)
        .bind(operation.as_str())
        .bind(entity_id)
        .bind(response)
        .execute(&self.pool)
        .await
        .map_err(map_db)?;
        Ok(())
    }

    async fn idempotency_remove(&self, key: &str, operation: OperationKind) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE key = $1 AND operation = $2")
            .bind(key)
            .bind(operation.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_db)?;
        Ok(())
    }

    async fn purge_idempotency(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_db)?;
        Ok(result.rows_affected())
    }
}
