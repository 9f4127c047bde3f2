//! Transport adapters implementing the [`Handler`](crate::handler::Handler)
//! contract.

pub mod espnow;
pub mod mqtt;

pub use espnow::EspNowHandler;
pub use mqtt::MqttHandler;
