//! Reservation and order-lifecycle engine.
//!
//! This crate provides the engine's public operations over the store
//! contract:
//! - [`ReservationService`] for reserve, release, transition, and the
//!   cache-aware read projections
//! - [`ExpirySweeper`] for periodic reclamation of lapsed pending holds
//! - [`IdempotencyGuard`] for client-key deduplication of retried requests
//! - [`EngineError`], the taxonomy front ends translate for users
//!
//! The engine is transport-agnostic: operations are plain `async fn`s
//! callable in-process or behind whatever RPC a front end chooses, and
//! every dependency (store, cache, clock, notifier) is injected.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod keys;
pub mod listings;
pub mod notify;
pub mod service;
pub mod sweeper;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use idempotency::{Guarded, IdempotencyGuard};
pub use listings::UnitSummary;
pub use notify::{Notification, Notifier, NoopNotifier, RecipientRole, RecordingNotifier};
pub use service::{PublishRequest, ReservationService, ReserveRequest};
pub use sweeper::{ExpirySweeper, SweepReport};
