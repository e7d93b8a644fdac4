//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the router, export
//! coordinator, resource ledger and process supervisor.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `TargetRegistry`, `EventFilterRouter`, `ExportCoordinator`,
//!   `ResourceLedger`, `ProcessSupervisor`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Session` listener (fans out to `SubscriberSet`).
//!
//! Publishing is synchronous and never blocks, so host callbacks running on
//! foreign threads publish directly.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
