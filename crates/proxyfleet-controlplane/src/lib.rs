//! proxyfleet control plane
//!
//! Consumes restart commands from RabbitMQ and applies them to the fleet.
//! Messages are handled strictly one after another.

pub mod dispatch;
pub mod error;
pub mod listener;
pub mod message;

pub use dispatch::{DispatchOutcome, DispatchStats, Dispatcher, Inbound, Unacked};
pub use error::{ControlPlaneError, Result};
pub use listener::{ControlPlane, consume};
pub use message::{ACTION_RESTART, ControlMessage, DecodeError, decode};
