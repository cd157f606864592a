//! Runtime-change events and the platform event bus.
//!
//! - [`change`] -- the closed [`RuntimeChangeEvent`] union parsed from
//!   producer payloads.
//! - [`listener`] -- the single-consumer change channel every producer
//!   submits through.
//! - [`bus`] -- broadcast bus for platform telemetry events.

pub mod bus;
pub mod change;
pub mod listener;

pub use bus::{EventBus, PlatformEvent};
pub use change::{ChangeError, ChangePayload, CreateSource, RuntimeChangeEvent};
pub use listener::{channel, ChangeEnvelope, ChangeListener, ChangeStream, ListenerError};
