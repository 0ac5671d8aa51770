//! Notification dispatch seam.
//!
//! Dispatch is fire-and-forget: it happens after the unit of work
//! commits, is never awaited as part of it, and a failing dispatcher
//! never fails the operation that triggered it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::ReservationId;
use store::{Actor, ReservationState};

/// Which party a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Buyer,
    Seller,
}

/// Payload handed to the dispatcher after a state change commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub reservation_id: ReservationId,
    pub new_state: ReservationState,
    pub recipient_role: RecipientRole,
}

/// Picks who should hear about a reservation entering `new_state`.
///
/// The party who drove the change already knows; the counterparty gets
/// the notification. System-driven changes go to the buyer.
pub fn recipient_for(new_state: ReservationState, actor: Actor) -> RecipientRole {
    match new_state {
        ReservationState::Pending => RecipientRole::Seller,
        ReservationState::Cancelled => match actor {
            Actor::Buyer => RecipientRole::Seller,
            _ => RecipientRole::Buyer,
        },
        _ => RecipientRole::Buyer,
    }
}

/// Trait for notification dispatchers.
///
/// Implementations deliver to chat, push, or e-mail collaborators; the
/// engine only hands over the payload.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification. Errors are the implementation's to
    /// handle; the engine logs and moves on.
    async fn dispatch(&self, notification: Notification);
}

/// Dispatcher that drops everything on the floor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn dispatch(&self, _notification: Notification) {}
}

/// Dispatcher that records payloads for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Arc<std::sync::Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Creates an empty recording dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every payload dispatched so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Returns the number of payloads dispatched.
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_reservations_notify_the_seller() {
        assert_eq!(
            recipient_for(ReservationState::Pending, Actor::Buyer),
            RecipientRole::Seller
        );
    }

    #[test]
    fn progress_notifies_the_buyer() {
        for state in [
            ReservationState::Confirmed,
            ReservationState::Preparing,
            ReservationState::Ready,
            ReservationState::Delivering,
            ReservationState::Completed,
            ReservationState::Expired,
        ] {
            assert_eq!(recipient_for(state, Actor::System), RecipientRole::Buyer);
        }
    }

    #[test]
    fn cancellation_notifies_the_counterparty() {
        assert_eq!(
            recipient_for(ReservationState::Cancelled, Actor::Buyer),
            RecipientRole::Seller
        );
        assert_eq!(
            recipient_for(ReservationState::Cancelled, Actor::Seller),
            RecipientRole::Buyer
        );
    }

    #[tokio::test]
    async fn recording_notifier_captures_payloads() {
        let notifier = RecordingNotifier::new();
        let notification = Notification {
            reservation_id: ReservationId::new(),
            new_state: ReservationState::Confirmed,
            recipient_role: RecipientRole::Buyer,
        };

        notifier.dispatch(notification.clone()).await;

        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.sent(), vec![notification]);
    }
}
