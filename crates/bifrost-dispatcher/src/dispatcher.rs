//! Routing and registration decision engine.
//!
//! Each inbound envelope is evaluated against an ordered, mutually exclusive
//! decision list (first match wins):
//!
//! 1. registration request addressed to `central`
//! 2. unknown sender - prompted to register, never relayed
//! 3. message to `central` - consumed internally
//! 4. message to a known other identifier - relayed via the destination's
//!    handler
//!
//! Dispatch is never concurrent with itself: the loop pulls one envelope and
//! drives it to completion (registry mutation, persistence and at most one
//! outbound send) before the next read, so the registry needs no locking.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use bifrost_core::{Envelope, MessageType, CENTRAL};
use bifrost_devices::{
    DeviceQuery, DeviceRecord, DeviceRegistry, Point, RegisterOutcome, TelemetrySink,
};

use crate::error::DispatchError;
use crate::handler::HandlerSet;

/// Sleep between polling passes when no handler produced anything.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reason an envelope was dropped instead of acted on. Every drop is also
/// logged with src, dst, type and reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Registration payload missing `id` or `device_type`.
    IncompleteRegistration,
    /// Registration carried an unrecognized protocol tag.
    UnknownProtocol,
    /// Destination identifier not present in the registry.
    UnknownDestination,
    /// No handler configured for the required protocol.
    HandlerUnavailable,
    /// The transport handler failed the send.
    WriteFailed,
}

/// Terminal state of one dispatch, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A new device was registered and the reply sent.
    Registered,
    /// The identifier was already claimed; stored record untouched.
    AlreadyRegistered,
    /// An unregistered sender was prompted to register.
    RegistrationPrompted,
    /// The message was addressed to `central` and consumed internally.
    Consumed,
    /// The message was relayed to its destination's transport.
    Relayed,
    /// The message was dropped.
    Dropped(DropReason),
}

/// The routing engine. Owns the registry (single-writer), holds the handler
/// set and the telemetry sink; constructed once at startup and passed
/// explicitly - no ambient global state.
pub struct Dispatcher {
    registry: DeviceRegistry,
    handlers: HandlerSet,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Dispatcher {
    pub fn new(
        registry: DeviceRegistry,
        handlers: HandlerSet,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            registry,
            handlers,
            telemetry,
        }
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Evaluate one inbound envelope.
    ///
    /// Returns `Err` only when persisting a registration fails; every other
    /// failure is swallowed here with a logged reason and reported through
    /// the outcome.
    pub async fn dispatch(&mut self, message: Envelope) -> Result<DispatchOutcome, DispatchError> {
        if message.dst == CENTRAL && message.kind == MessageType::Register {
            return self.handle_registration(&message).await;
        }

        let source = self
            .registry
            .search(&DeviceQuery::by_address(&message.src))
            .first()
            .map(|(_, record)| (*record).clone());

        let Some(source) = source else {
            return Ok(self.request_registration(&message).await);
        };

        if message.dst == CENTRAL {
            return Ok(self.consume_central(&message, &source).await);
        }

        self.route_to_device(&message, &source).await
    }

    /// Decision 1: register the sender and confirm through the inbound
    /// protocol's handler.
    async fn handle_registration(
        &mut self,
        message: &Envelope,
    ) -> Result<DispatchOutcome, DispatchError> {
        let device_id = message.payload.get("id").and_then(Value::as_str);
        let device_type = message.payload.get("device_type").and_then(Value::as_str);

        let (Some(device_id), Some(device_type)) = (device_id, device_type) else {
            warn!(
                "Registration from '{}' ({}) missing 'id' or 'device_type', {} to '{}' dropped",
                message.src, message.protocol, message.kind, message.dst
            );
            return Ok(DispatchOutcome::Dropped(DropReason::IncompleteRegistration));
        };

        let record =
            match DeviceRecord::from_registration(&message.protocol, device_type, &message.src) {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        "Registration from '{}' rejected: {e}, {} to '{}' dropped without reply",
                        message.src, message.kind, message.dst
                    );
                    return Ok(DispatchOutcome::Dropped(DropReason::UnknownProtocol));
                }
            };

        // Persistence failure is fatal by design.
        let outcome = self.registry.add(device_id, record.clone())?;

        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::from(outcome.status()));
        payload.insert("device_id".to_string(), Value::from(device_id));
        let response = Envelope::new(
            &message.protocol,
            CENTRAL,
            &message.src,
            MessageType::RegisterResponse,
            payload,
        );

        match self.handlers.get(&message.protocol) {
            Some(handler) => {
                // Start listening for the device before confirming, so its
                // first message after the reply is not missed.
                if outcome == RegisterOutcome::Registered {
                    handler.track(&record).await;
                }
                match handler.write(&response, &record).await {
                    Ok(()) => debug!("Registration reply sent to '{}'", message.src),
                    Err(e) => error!("Failed to send registration reply to '{}': {e}", message.src),
                }
            }
            None => error!(
                "No handler for protocol '{}' to send registration reply",
                message.protocol
            ),
        }

        Ok(match outcome {
            RegisterOutcome::Registered => DispatchOutcome::Registered,
            RegisterOutcome::AlreadyRegistered => DispatchOutcome::AlreadyRegistered,
        })
    }

    /// Decision 2: unregistered traffic is never relayed, only prompted to
    /// register over the protocol it arrived on.
    async fn request_registration(&self, message: &Envelope) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&message.protocol) else {
            error!(
                "Unknown sender '{}' on protocol '{}' with no handler, {} to '{}' dropped",
                message.src, message.protocol, message.kind, message.dst
            );
            return DispatchOutcome::Dropped(DropReason::HandlerUnavailable);
        };

        // Ephemeral record: the sender is addressed by its raw transport
        // address until it registers.
        let peer = match DeviceRecord::from_registration(&message.protocol, "unregistered", &message.src)
        {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "Cannot prompt '{}' to register: {e}, message dropped",
                    message.src
                );
                return DispatchOutcome::Dropped(DropReason::UnknownProtocol);
            }
        };

        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::from("not_registered"));
        let request = Envelope::new(
            &message.protocol,
            CENTRAL,
            &message.src,
            MessageType::RegisterRequest,
            payload,
        );

        match handler.write(&request, &peer).await {
            Ok(()) => {
                debug!(
                    "'{}' is not registered, registration request sent",
                    message.src
                );
                DispatchOutcome::RegistrationPrompted
            }
            Err(e) => {
                warn!(
                    "Failed to send registration request to '{}': {e}",
                    message.src
                );
                DispatchOutcome::Dropped(DropReason::WriteFailed)
            }
        }
    }

    /// Decision 3: traffic addressed to the bridge itself is consumed, never
    /// relayed onward.
    async fn consume_central(&self, message: &Envelope, source: &DeviceRecord) -> DispatchOutcome {
        let body = Value::Object(message.payload.clone());
        info!("[central] {} from '{}': {body}", message.kind, message.src);

        let point = Point::from_envelope(message, source.device_type());
        if let Err(e) = self.telemetry.write(point).await {
            warn!("Telemetry write failed (ignored): {e}");
        }

        DispatchOutcome::Consumed
    }

    /// Decision 4: relay to a known identifier over its own transport.
    async fn route_to_device(
        &self,
        message: &Envelope,
        source: &DeviceRecord,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(destination) = self.registry.get_by_id(&message.dst) else {
            debug!(
                "Destination '{}' not registered, {} from '{}' dropped",
                message.dst, message.kind, message.src
            );
            return Ok(DispatchOutcome::Dropped(DropReason::UnknownDestination));
        };

        let Some(handler) = self.handlers.get(destination.protocol()) else {
            // Configuration gap, not fatal.
            warn!(
                "No handler for protocol '{}', {} from '{}' to '{}' dropped",
                destination.protocol(),
                message.kind,
                message.src,
                message.dst
            );
            return Ok(DispatchOutcome::Dropped(DropReason::HandlerUnavailable));
        };

        let outbound = Envelope::new(
            destination.protocol(),
            &message.src,
            destination.destination(),
            message.kind.clone(),
            message.payload.clone(),
        );

        if let Err(e) = handler.write(&outbound, destination).await {
            warn!(
                "Relay of {} from '{}' to '{}' failed: {e}",
                message.kind, message.src, message.dst
            );
            return Ok(DispatchOutcome::Dropped(DropReason::WriteFailed));
        }

        info!(
            "'{}' -> '{}' via '{}'",
            message.src,
            message.dst,
            destination.protocol()
        );

        let point = Point::from_envelope(&outbound, source.device_type());
        if let Err(e) = self.telemetry.write(point).await {
            warn!("Telemetry write failed (ignored): {e}");
        }

        Ok(DispatchOutcome::Relayed)
    }
}

/// The dispatch loop: round-robin, non-blocking reads over every handler,
/// each pulled envelope dispatched to completion before the next read.
///
/// Runs until `shutdown` resolves, then closes all handlers. Returns early
/// only on a fatal dispatch error (handlers are closed in that case too).
pub async fn run(
    dispatcher: &mut Dispatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), DispatchError> {
    tokio::pin!(shutdown);

    let handlers = dispatcher.handlers().all();
    info!("Dispatch loop started with {} handler(s)", handlers.len());

    loop {
        let mut drained = false;
        for handler in &handlers {
            if let Some(envelope) = handler.read() {
                drained = true;
                if let Err(e) = dispatcher.dispatch(envelope).await {
                    error!("Fatal dispatch error: {e}");
                    dispatcher.handlers().close_all().await;
                    return Err(e);
                }
            }
        }

        // Yield between passes; back off when a full pass drained nothing.
        let pause = if drained {
            Duration::ZERO
        } else {
            IDLE_POLL_INTERVAL
        };
        tokio::select! {
            () = &mut shutdown => break,
            () = tokio::time::sleep(pause) => {}
        }
    }

    info!("Dispatch loop stopping, closing handlers");
    dispatcher.handlers().close_all().await;
    Ok(())
}
