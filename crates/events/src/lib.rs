//! Event primitives and in-process pub/sub.
//!
//! The job engine publishes progress updates and the workflow guard publishes
//! status changes through the same [`EventBus`] abstraction.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
