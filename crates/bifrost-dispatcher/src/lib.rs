//! Bifrost dispatcher - the routing engine bridging the transports.
//!
//! The [`Dispatcher`] maps each inbound [`Envelope`](bifrost_core::Envelope)
//! to zero or one outbound envelope, keeping the device registry consistent
//! along the way. Transports plug in through the [`Handler`] contract; the
//! single [`run`] loop is the only consumer of their inbound queues.

pub mod adapters;
pub mod dispatcher;
pub mod error;
pub mod handler;

pub use adapters::{EspNowHandler, MqttHandler};
pub use dispatcher::{run, DispatchOutcome, Dispatcher, DropReason};
pub use error::{DispatchError, HandlerError};
pub use handler::{Handler, HandlerSet};
