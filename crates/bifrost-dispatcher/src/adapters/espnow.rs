//! ESP-NOW transport handler - a framed serial link to the radio bridge.
//!
//! Frames are newline-delimited JSON. A reader task owns the receive half of
//! the port: it line-splits the stream, applies the cheap framing filter and
//! queues parsed envelopes for the dispatch loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use bifrost_core::{looks_like_frame, Envelope};
use bifrost_devices::{DeviceRecord, PROTOCOL_ESPNOW};

use crate::error::HandlerError;
use crate::handler::Handler;

/// Consecutive read failures before the reader slows down.
const READ_ERROR_THRESHOLD: u32 = 3;
/// Pause between reads once the threshold is hit.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handler for devices reached over the ESP-NOW serial radio link.
pub struct EspNowHandler {
    inbound: async_channel::Receiver<Envelope>,
    writer: Mutex<WriteHalf<SerialStream>>,
    running: Arc<AtomicBool>,
    port: String,
}

impl EspNowHandler {
    /// Open the serial port and start the reader task.
    pub fn connect(port: &str, baudrate: u32) -> Result<Self, HandlerError> {
        let stream = tokio_serial::new(port, baudrate)
            .open_native_async()
            .map_err(|e| HandlerError::Transport(format!("cannot open '{port}': {e}")))?;

        info!("Connected to serial port '{port}' @ {baudrate}bps");

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = async_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let task_running = running.clone();
        let task_port = port.to_string();
        tokio::spawn(read_task(read_half, tx, task_running, task_port));

        Ok(Self {
            inbound: rx,
            writer: Mutex::new(write_half),
            running,
            port: port.to_string(),
        })
    }
}

async fn read_task<R>(
    read_half: R,
    tx: async_channel::Sender<Envelope>,
    running: Arc<AtomicBool>,
    port: String,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(read_half).lines();
    let mut consecutive_errors = 0u32;

    while running.load(Ordering::Relaxed) {
        match lines.next_line().await {
            Ok(Some(line)) => {
                consecutive_errors = 0;
                let raw = line.trim();
                // Serial lines carry boot noise and partial frames; discard
                // cheaply before parsing.
                if !looks_like_frame(raw.as_bytes()) {
                    continue;
                }
                match Envelope::parse(raw.as_bytes()) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("{port} - dropping frame: {e}");
                    }
                }
            }
            Ok(None) => {
                warn!("{port} - serial stream ended");
                break;
            }
            Err(e) => {
                // Garbage bytes mid-stream (e.g. invalid UTF-8) are skipped;
                // a dead port fails every read instantly, so back off once
                // the errors keep coming.
                consecutive_errors += 1;
                debug!("{port} - read error: {e}");
                if consecutive_errors >= READ_ERROR_THRESHOLD {
                    warn!("{port} - {consecutive_errors} consecutive read errors, backing off");
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
    }
    debug!("{port} - reader task finished");
}

#[async_trait]
impl Handler for EspNowHandler {
    fn protocol(&self) -> &str {
        PROTOCOL_ESPNOW
    }

    fn read(&self) -> Option<Envelope> {
        self.inbound.try_recv().ok()
    }

    async fn write(&self, envelope: &Envelope, device: &DeviceRecord) -> Result<(), HandlerError> {
        if !matches!(device, DeviceRecord::EspNow { .. }) {
            return Err(HandlerError::ProtocolMismatch {
                handler: PROTOCOL_ESPNOW.to_string(),
                device: device.protocol().to_string(),
            });
        }

        if !self.running.load(Ordering::Relaxed) {
            return Err(HandlerError::Closed);
        }

        let frame = envelope.serialize();
        let mut writer = self.writer.lock().await;
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| HandlerError::Transport(e.to_string()))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| HandlerError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| HandlerError::Transport(e.to_string()))?;

        debug!("Sent {} to '{}' on '{}'", envelope.kind, device.destination(), self.port);
        Ok(())
    }

    async fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.inbound.close();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("{} - shutdown: {e}", self.port);
        }
    }
}
