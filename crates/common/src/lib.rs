//! Shared primitives for the reservation engine.
//!
//! This crate provides:
//! - Typed identifier newtypes so unit, seller, buyer, and reservation IDs
//!   cannot be mixed up
//! - Human-presentable confirmation codes
//! - A `Clock` seam so time-dependent logic is injectable in tests

pub mod clock;
pub mod code;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use code::ConfirmationCode;
pub use types::{BuyerId, ReservationId, SellerId, UnitId};
