//! Transaction coordination
//!
//! Owns the transport, reassembles inbound bytes into frames, dispatches the
//! transport-level ACK, enforces per-transaction timeouts and guarantees at
//! most one in-flight transaction.
//!
//! All state transitions go through one mutex, so byte deliveries from the
//! transport's reader thread can never race a caller's transition from idle
//! to awaiting. Where the transport lock is taken while holding the state
//! lock (the ACK write), that is the only nesting order used.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::frame::{FrameCodec, ACK, ETX, STX};
use super::requests::{PurchaseRequest, ReversalRequest};
use super::response::TerminalResponse;
use super::transport::{ByteSink, SerialTransport};
use super::{TefError, MAX_FRAME_SIZE};
use crate::config::BridgeConfig;

/// Lock that survives poisoning; a panicked holder leaves only bytes behind
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-flight transaction state
struct PendingTransaction {
    deadline: Instant,
    completion: mpsc::Sender<Result<TerminalResponse, TefError>>,
}

#[derive(Default)]
struct Shared {
    pending: Option<PendingTransaction>,
    buffer: Vec<u8>,
    connected: bool,
    port_name: Option<String>,
}

/// Connection and link state reported to the POS layer
#[derive(Debug, Clone, serde::Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: u32,
}

/// Drives the half-duplex exchange with the terminal
pub struct TransactionCoordinator {
    transport: Arc<Mutex<Box<dyn SerialTransport>>>,
    shared: Arc<Mutex<Shared>>,
    config: BridgeConfig,
}

impl TransactionCoordinator {
    /// Create a coordinator owning the given transport
    pub fn new(transport: Box<dyn SerialTransport>, config: BridgeConfig) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let transport = Arc::new(Mutex::new(transport));
        let sink = Arc::new(CoordinatorSink {
            shared: Arc::clone(&shared),
            transport: Arc::clone(&transport),
        });
        lock(&transport).set_sink(sink);
        Self {
            transport,
            shared,
            config,
        }
    }

    /// Open the serial link on the given device
    pub fn connect(&self, port: &str) -> Result<(), TefError> {
        let mut settings = self.config.serial.clone();
        settings.port = port.to_string();
        lock(&self.transport).open(&settings)?;
        let mut shared = lock(&self.shared);
        shared.connected = true;
        shared.port_name = Some(port.to_string());
        shared.buffer.clear();
        log::info!("connected to terminal on {port}");
        Ok(())
    }

    /// Close the link; a pending transaction completes with `Closed`
    pub fn disconnect(&self) {
        {
            let mut shared = lock(&self.shared);
            shared.connected = false;
            shared.port_name = None;
            shared.buffer.clear();
            if let Some(pending) = shared.pending.take() {
                let _ = pending.completion.send(Err(TefError::Closed));
            }
        }
        lock(&self.transport).close();
        log::info!("disconnected from terminal");
    }

    pub fn status(&self) -> BridgeStatus {
        let shared = lock(&self.shared);
        BridgeStatus {
            connected: shared.connected,
            port: shared.port_name.clone(),
            baud: self.config.serial.baud,
        }
    }

    /// Run a purchase against the terminal
    pub fn send_purchase(
        &self,
        request: &PurchaseRequest,
        timeout: Option<Duration>,
    ) -> Result<TerminalResponse, TefError> {
        let frame = FrameCodec::encode_purchase(request)?;
        log::info!(
            "purchase {}: {} cents on terminal {}",
            request.transaction_id,
            request.amount_cents,
            request.terminal_id
        );
        self.send_and_receive(frame, timeout)
    }

    /// Void a prior transaction by receipt number
    pub fn send_reversal(
        &self,
        request: &ReversalRequest,
        timeout: Option<Duration>,
    ) -> Result<TerminalResponse, TefError> {
        let frame = FrameCodec::encode_reversal(request)?;
        log::info!(
            "reversal {} for receipt {}",
            request.transaction_id,
            request.receipt_number
        );
        self.send_and_receive(frame, timeout)
    }

    /// Optional pre-purchase handshake
    pub fn send_handshake(&self, timeout: Option<Duration>) -> Result<TerminalResponse, TefError> {
        self.send_and_receive(FrameCodec::encode_handshake(), timeout)
    }

    /// Send one frame and wait for the terminal's response.
    ///
    /// Fails fast with `Busy` while another transaction is pending; the
    /// coordinator never queues.
    pub fn send_and_receive(
        &self,
        frame: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<TerminalResponse, TefError> {
        let timeout = timeout.unwrap_or_else(|| Duration::from_millis(self.config.tef.timeout_ms));
        let (completion, outcome) = mpsc::channel();
        {
            let mut shared = lock(&self.shared);
            if !shared.connected {
                return Err(TefError::NotConnected);
            }
            if shared.pending.is_some() {
                return Err(TefError::Busy);
            }
            shared.pending = Some(PendingTransaction {
                deadline: Instant::now() + timeout,
                completion,
            });
        }
        if let Err(e) = lock(&self.transport).write(&frame) {
            lock(&self.shared).pending = None;
            return Err(e);
        }
        match outcome.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let mut shared = lock(&self.shared);
                // A frame may have completed us in the same instant; honor it.
                if let Ok(result) = outcome.try_recv() {
                    return result;
                }
                shared.pending = None;
                log::warn!("transaction timed out after {timeout:?}");
                Err(TefError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(TefError::Closed),
        }
    }
}

/// Sink wired into the transport; every delivery is serialized through the
/// shared state lock.
struct CoordinatorSink {
    shared: Arc<Mutex<Shared>>,
    transport: Arc<Mutex<Box<dyn SerialTransport>>>,
}

impl ByteSink for CoordinatorSink {
    fn on_bytes(&self, chunk: &[u8]) {
        let mut shared = lock(&self.shared);
        shared.buffer.extend_from_slice(chunk);
        if shared.buffer.len() > MAX_FRAME_SIZE {
            log::warn!(
                "reassembly buffer exceeded {MAX_FRAME_SIZE} bytes without a frame, dropping"
            );
            shared.buffer.clear();
            return;
        }
        loop {
            // A lone ACK is the terminal's transport-level acknowledgement
            if shared.buffer.len() == 1 && shared.buffer[0] == ACK {
                log::trace!("terminal ACK observed");
                shared.buffer.clear();
                break;
            }
            // Drop stale bytes preceding the frame start
            let Some(stx) = shared.buffer.iter().position(|&b| b == STX) else {
                if !shared.buffer.is_empty() {
                    log::trace!("dropping {} noise bytes", shared.buffer.len());
                    shared.buffer.clear();
                }
                break;
            };
            if stx > 0 {
                shared.buffer.drain(..stx);
            }
            let Some(etx) = shared.buffer.iter().position(|&b| b == ETX) else {
                break; // frame incomplete, wait for more bytes
            };
            if shared.buffer.len() < etx + 2 {
                break; // LRC not here yet
            }
            let candidate: Vec<u8> = shared.buffer.drain(..etx + 2).collect();
            match FrameCodec::decode(&candidate) {
                Ok(frame) => {
                    if let Err(e) = lock(&self.transport).write(&[ACK]) {
                        log::warn!("failed to ACK frame: {e}");
                    }
                    let response = TerminalResponse::from_frame(frame);
                    match shared.pending.take() {
                        Some(pending) => {
                            log::debug!(
                                "transaction completed with {}ms to spare",
                                pending
                                    .deadline
                                    .saturating_duration_since(Instant::now())
                                    .as_millis()
                            );
                            let _ = pending.completion.send(Ok(response));
                        }
                        None => log::debug!("response with no transaction pending, dropped"),
                    }
                }
                // Candidate only is discarded; later bytes keep buffering
                Err(e) => log::warn!("discarding invalid frame: {e}"),
            }
            if shared.buffer.is_empty() {
                break;
            }
        }
    }

    fn on_error(&self, error: TefError) {
        log::warn!("transport failed: {error}");
        let mut shared = lock(&self.shared);
        shared.connected = false;
        shared.buffer.clear();
        if let Some(pending) = shared.pending.take() {
            let _ = pending.completion.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::MockTransport;

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(Box::new(MockTransport::new()), BridgeConfig::default())
    }

    #[test]
    fn test_not_connected() {
        let coord = coordinator();
        let request = PurchaseRequest {
            amount_cents: 1000,
            tax_cents: 0,
            tip_cents: 0,
            iac: 0,
            terminal_id: "001".to_string(),
            transaction_id: "T1".to_string(),
            cashier_id: "OP".to_string(),
            send_pan: false,
        };
        assert!(matches!(
            coord.send_purchase(&request, None),
            Err(TefError::NotConnected)
        ));
    }

    #[test]
    fn test_status_tracks_connection() {
        let coord = coordinator();
        let status = coord.status();
        assert!(!status.connected);
        assert!(status.port.is_none());

        coord.connect("mock0").unwrap();
        let status = coord.status();
        assert!(status.connected);
        assert_eq!(status.port.as_deref(), Some("mock0"));
        assert_eq!(status.baud, 9600);

        coord.disconnect();
        assert!(!coord.status().connected);
    }

    #[test]
    fn test_invalid_request_leaves_coordinator_usable() {
        let coord = coordinator();
        coord.connect("mock0").unwrap();
        let bad = PurchaseRequest {
            amount_cents: 0,
            tax_cents: 0,
            tip_cents: 0,
            iac: 0,
            terminal_id: "001".to_string(),
            transaction_id: "T1".to_string(),
            cashier_id: "OP".to_string(),
            send_pan: false,
        };
        assert!(matches!(
            coord.send_purchase(&bad, None),
            Err(TefError::InvalidRequest(_))
        ));
        assert!(coord.status().connected);
    }
}
