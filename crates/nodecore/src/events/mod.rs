// crates/nodecore/src/events/mod.rs

mod base;

pub use base::{EventBus, RegistryEvent};
