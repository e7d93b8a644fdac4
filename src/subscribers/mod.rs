//! # Event subscribers.
//!
//! Sessions publish [`Event`](crate::Event)s on a broadcast [`Bus`](crate::events::Bus);
//! a listener task forwards them to a [`SubscriberSet`], which fans them out to
//! every [`Subscribe`] implementation.
//!
//! ```text
//! Registry / Ledger / Export / Router / Supervisor ── publish ──► Bus
//!                                                                  │
//!                                                          session listener
//!                                                                  ▼
//!                                                            SubscriberSet
//!                                                        ┌────────┼────────┐
//!                                                        ▼        ▼        ▼
//!                                                    LogWriter  Custom    ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
