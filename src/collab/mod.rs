//! Shared collaboration log and its live fan-out
//!
//! The store is the only mutation path (`append`); the bus mirrors every
//! append to live subscribers so the UI can stream without the core ever
//! calling back into it.

pub mod bus;
pub mod store;

pub use bus::{BusError, EventBus, EventFilter, EventStream, SharedEventBus};
pub use store::{CollabStore, StoreError, TRUNCATED_EVENT};
