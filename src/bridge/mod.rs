//! Host bridge: the JSON command surface and the loop that feeds it to the
//! controller.

pub mod dispatcher;
pub mod messages;
pub mod runner;

pub use dispatcher::{dispatch, dispatch_json, DispatchOutcome};
pub use messages::{InboundMessage, OutboundMessage};
pub use runner::Engine;
