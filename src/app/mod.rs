pub mod controller;
pub mod listener;

pub use controller::{Controller, EngineEvent, EngineEvents, FilterTarget, TickReport};
pub use listener::ListenerState;
