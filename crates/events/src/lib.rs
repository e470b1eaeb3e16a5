//! Status broadcasting infrastructure.
//!
//! This crate provides the push half of the status surface:
//!
//! - [`StatusEvent`] — the closed enumeration of job/queue state-change
//!   events, with one fixed payload shape per kind.
//! - [`StatusBroadcaster`] — best-effort fan-out hub backed by
//!   `tokio::sync::broadcast`, addressing events to users directly or to
//!   every member of a project.
//!
//! Delivery is at-most-once; the REST endpoints remain the source of truth.

pub mod broadcaster;
pub mod event;

pub use broadcaster::{AddressedEvent, StatusBroadcaster};
pub use event::StatusEvent;
