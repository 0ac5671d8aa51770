//! Namespaced cache keys.
//!
//! One place builds every key so invalidation and population can never
//! disagree on spelling.

use common::{ReservationId, UnitId};
use store::UnitFilter;

/// Prefix under which every listing variant is cached.
pub const LISTING_PREFIX: &str = "listing:";

/// Key for a unit's detail entry.
pub fn unit(unit_id: UnitId) -> String {
    format!("unit:{unit_id}")
}

/// Key for a reservation's detail entry.
pub fn reservation(reservation_id: ReservationId) -> String {
    format!("reservation:{reservation_id}")
}

/// Key for one listing variant, derived from the filter's signature.
pub fn listing(filter: &UnitFilter) -> String {
    format!("{LISTING_PREFIX}{}", filter.signature())
}
