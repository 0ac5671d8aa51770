//! Reservation state machine.

use serde::{Deserialize, Serialize};

/// The state of a reservation in its lifecycle.
///
/// State transitions (stock is already held on entry to `Pending`):
/// ```text
/// Pending ──► Confirmed ──────────────────────────────► Completed   (pickup)
///    │            └──► Preparing ──► Ready ──► Delivering ──► Completed   (delivery)
///    │
///    └──► Expired                 any non-terminal ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// Stock reserved, awaiting seller acceptance. The only state the
    /// expiry sweeper acts on.
    #[default]
    Pending,

    /// Seller accepted; the hold no longer expires.
    Confirmed,

    /// Delivery only: order is being prepared.
    Preparing,

    /// Delivery only: prepared and awaiting courier pickup.
    Ready,

    /// Delivery only: courier is en route.
    Delivering,

    /// Fulfilled (terminal state).
    Completed,

    /// Explicitly cancelled; stock returned (terminal state).
    Cancelled,

    /// Hold lapsed before confirmation; stock returned (terminal state).
    Expired,
}

impl ReservationState {
    /// Returns true if no further transitions are accepted from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationState::Completed | ReservationState::Cancelled | ReservationState::Expired
        )
    }

    /// Returns true if entering this state returns stock to the unit.
    pub fn returns_stock(&self) -> bool {
        matches!(
            self,
            ReservationState::Cancelled | ReservationState::Expired
        )
    }

    /// Returns true if an explicit cancel is permitted from this state.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Pending => "pending",
            ReservationState::Confirmed => "confirmed",
            ReservationState::Preparing => "preparing",
            ReservationState::Ready => "ready",
            ReservationState::Delivering => "delivering",
            ReservationState::Completed => "completed",
            ReservationState::Cancelled => "cancelled",
            ReservationState::Expired => "expired",
        }
    }

    /// Parses a stored state name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReservationState::Pending),
            "confirmed" => Some(ReservationState::Confirmed),
            "preparing" => Some(ReservationState::Preparing),
            "ready" => Some(ReservationState::Ready),
            "delivering" => Some(ReservationState::Delivering),
            "completed" => Some(ReservationState::Completed),
            "cancelled" => Some(ReservationState::Cancelled),
            "expired" => Some(ReservationState::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a reservation is fulfilled.
///
/// Pickup reservations ("bookings") and delivery reservations ("orders")
/// share one state machine; the kind selects which edges are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentKind {
    /// Buyer collects in store, presenting the confirmation code.
    Pickup,
    /// Courier delivers to the buyer.
    Delivery,
}

impl FulfillmentKind {
    /// Returns true if `from → to` is a legal edge for this fulfillment kind.
    pub fn permits(&self, from: ReservationState, to: ReservationState) -> bool {
        use ReservationState::*;

        match (self, from, to) {
            (_, s, Cancelled) if !s.is_terminal() => true,
            (_, Pending, Expired) => true,
            (_, Pending, Confirmed) => true,
            (FulfillmentKind::Pickup, Confirmed, Completed) => true,
            (FulfillmentKind::Delivery, Confirmed, Preparing) => true,
            (FulfillmentKind::Delivery, Preparing, Ready) => true,
            (FulfillmentKind::Delivery, Ready, Delivering) => true,
            (FulfillmentKind::Delivery, Delivering, Completed) => true,
            _ => false,
        }
    }

    /// Returns the kind name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentKind::Pickup => "pickup",
            FulfillmentKind::Delivery => "delivery",
        }
    }

    /// Parses a stored kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pickup" => Some(FulfillmentKind::Pickup),
            "delivery" => Some(FulfillmentKind::Delivery),
            _ => None,
        }
    }
}

impl std::fmt::Display for FulfillmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who is driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Buyer,
    Seller,
    Courier,
    System,
}

impl Actor {
    /// Returns the actor name as stored in the history log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Buyer => "buyer",
            Actor::Seller => "seller",
            Actor::Courier => "courier",
            Actor::System => "system",
        }
    }

    /// Parses a stored actor name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buyer" => Some(Actor::Buyer),
            "seller" => Some(Actor::Seller),
            "courier" => Some(Actor::Courier),
            "system" => Some(Actor::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returns true if `actor` is permitted to drive a transition into `to`.
///
/// Sellers accept and prepare, couriers move delivery orders, buyers and
/// sellers may cancel, and only the system expires.
pub fn actor_may_drive(kind: FulfillmentKind, to: ReservationState, actor: Actor) -> bool {
    use ReservationState::*;

    match to {
        Confirmed | Preparing | Ready => actor == Actor::Seller,
        Delivering => actor == Actor::Courier,
        Completed => match kind {
            FulfillmentKind::Pickup => actor == Actor::Seller,
            FulfillmentKind::Delivery => actor == Actor::Courier,
        },
        Cancelled => matches!(actor, Actor::Buyer | Actor::Seller),
        Expired => actor == Actor::System,
        Pending => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationState::*;

    const ALL_STATES: [ReservationState; 8] = [
        Pending, Confirmed, Preparing, Ready, Delivering, Completed, Cancelled, Expired,
    ];

    #[test]
    fn default_state_is_pending() {
        assert_eq!(ReservationState::default(), Pending);
    }

    #[test]
    fn terminal_states() {
        assert!(!Pending.is_terminal());
        assert!(!Confirmed.is_terminal());
        assert!(!Preparing.is_terminal());
        assert!(!Ready.is_terminal());
        assert!(!Delivering.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Expired.is_terminal());
    }

    #[test]
    fn pickup_path() {
        let kind = FulfillmentKind::Pickup;
        assert!(kind.permits(Pending, Confirmed));
        assert!(kind.permits(Confirmed, Completed));

        // Delivery-only edges are illegal for pickup.
        assert!(!kind.permits(Confirmed, Preparing));
        assert!(!kind.permits(Ready, Delivering));
    }

    #[test]
    fn delivery_path() {
        let kind = FulfillmentKind::Delivery;
        assert!(kind.permits(Pending, Confirmed));
        assert!(kind.permits(Confirmed, Preparing));
        assert!(kind.permits(Preparing, Ready));
        assert!(kind.permits(Ready, Delivering));
        assert!(kind.permits(Delivering, Completed));

        // Delivery may not jump straight from Confirmed to Completed.
        assert!(!kind.permits(Confirmed, Completed));
    }

    #[test]
    fn cancel_allowed_from_every_non_terminal_state() {
        for kind in [FulfillmentKind::Pickup, FulfillmentKind::Delivery] {
            for from in ALL_STATES {
                assert_eq!(kind.permits(from, Cancelled), !from.is_terminal());
            }
        }
    }

    #[test]
    fn expire_allowed_from_pending_only() {
        for kind in [FulfillmentKind::Pickup, FulfillmentKind::Delivery] {
            for from in ALL_STATES {
                assert_eq!(kind.permits(from, Expired), from == Pending);
            }
        }
    }

    #[test]
    fn no_transitions_out_of_terminal_states() {
        for kind in [FulfillmentKind::Pickup, FulfillmentKind::Delivery] {
            for from in [Completed, Cancelled, Expired] {
                for to in ALL_STATES {
                    assert!(!kind.permits(from, to), "{kind}: {from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn no_backward_or_skip_moves() {
        let kind = FulfillmentKind::Delivery;
        assert!(!kind.permits(Completed, Confirmed));
        assert!(!kind.permits(Confirmed, Pending));
        assert!(!kind.permits(Confirmed, Ready));
        assert!(!kind.permits(Pending, Completed));
        assert!(!kind.permits(Delivering, Ready));
    }

    #[test]
    fn actor_rules() {
        use FulfillmentKind::*;

        assert!(actor_may_drive(Pickup, Confirmed, Actor::Seller));
        assert!(!actor_may_drive(Pickup, Confirmed, Actor::Buyer));

        assert!(actor_may_drive(Delivery, Delivering, Actor::Courier));
        assert!(!actor_may_drive(Delivery, Delivering, Actor::Seller));

        assert!(actor_may_drive(Pickup, Completed, Actor::Seller));
        assert!(actor_may_drive(Delivery, Completed, Actor::Courier));
        assert!(!actor_may_drive(Delivery, Completed, Actor::Seller));

        assert!(actor_may_drive(Pickup, Cancelled, Actor::Buyer));
        assert!(actor_may_drive(Pickup, Cancelled, Actor::Seller));
        assert!(!actor_may_drive(Pickup, Cancelled, Actor::Courier));

        assert!(actor_may_drive(Delivery, Expired, Actor::System));
        assert!(!actor_may_drive(Delivery, Expired, Actor::Buyer));
    }

    #[test]
    fn returns_stock_only_for_release_states() {
        for state in ALL_STATES {
            assert_eq!(state.returns_stock(), matches!(state, Cancelled | Expired));
        }
    }

    #[test]
    fn state_names_roundtrip() {
        for state in ALL_STATES {
            assert_eq!(ReservationState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ReservationState::parse("bogus"), None);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&Delivering).unwrap();
        assert_eq!(json, "\"delivering\"");
        let back: ReservationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Delivering);
    }
}
