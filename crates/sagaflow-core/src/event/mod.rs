//! Event bus for saga lifecycle notifications.

pub mod bus;

pub use bus::{DEFAULT_CAPACITY, SagaEventBus, SagaWatch};
