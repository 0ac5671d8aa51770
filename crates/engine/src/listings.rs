//! Cache-aware read projections for browsing UIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{Clock, SellerId, UnitId};
use store::{InventoryStore, InventoryUnit, UnitFilter};

use crate::error::{EngineError, Result};
use crate::keys;
use crate::service::ReservationService;

/// What a browsing UI needs to render one available unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_id: UnitId,
    pub seller_id: SellerId,
    pub remaining_quantity: i32,
    pub total_quantity: i32,
    pub published_at: DateTime<Utc>,
}

impl From<&InventoryUnit> for UnitSummary {
    fn from(unit: &InventoryUnit) -> Self {
        Self {
            unit_id: unit.id,
            seller_id: unit.seller_id,
            remaining_quantity: unit.remaining_quantity,
            total_quantity: unit.total_quantity,
            published_at: unit.published_at,
        }
    }
}

impl<S, C> ReservationService<S, C>
where
    S: InventoryStore + Clone,
    C: Clock,
{
    /// Lists available units matching the filter.
    ///
    /// Served from the cache when a listing for this filter is still
    /// live; a miss loads from the store and populates both tiers. The
    /// cache may lag a write by up to its TTL; reservation arithmetic
    /// never reads it.
    pub async fn list_available(&self, filter: &UnitFilter) -> Result<Vec<UnitSummary>> {
        let key = keys::listing(filter);
        if let Some(cached) = self.cache.get::<Vec<UnitSummary>>(&key).await {
            return Ok(cached);
        }

        let units = self.store.list_units(filter).await?;
        let summaries: Vec<UnitSummary> = units.iter().map(UnitSummary::from).collect();

        self.cache.put(&key, &summaries).await;
        Ok(summaries)
    }

    /// Fetches a unit's detail, serving cached reads where possible.
    pub async fn get_unit(&self, unit_id: UnitId) -> Result<InventoryUnit> {
        let key = keys::unit(unit_id);
        if let Some(cached) = self.cache.get::<InventoryUnit>(&key).await {
            return Ok(cached);
        }

        let unit = self
            .store
            .get_unit(unit_id)
            .await?
            .ok_or(EngineError::NotFound {
                entity: "inventory unit",
                id: unit_id.to_string(),
            })?;

        self.cache.put(&key, &unit).await;
        Ok(unit)
    }
}
