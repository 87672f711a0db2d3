//! Transport abstraction
//!
//! Byte-level I/O under the coordinator. Two implementations share the
//! contract: the real `serialport` adapter in [`super::serial`] and an
//! in-memory mock that answers every write with a canned approved purchase,
//! for development without a terminal on the desk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::frame::{FrameBuilder, PresentationHeader, ACK};
use super::TefError;
use crate::config::SerialSettings;

/// Receiver of inbound transport traffic. Registered once, before `open`.
pub trait ByteSink: Send + Sync {
    /// Called for every chunk received; chunk boundaries carry no meaning
    fn on_bytes(&self, chunk: &[u8]);
    /// Called when the transport fails asynchronously. A local `close` is
    /// reported by the closer, not through the sink.
    fn on_error(&self, error: TefError);
}

/// Byte-level I/O owned by the coordinator
pub trait SerialTransport: Send {
    /// Acquire the device. Re-opening an open transport is an error.
    fn open(&mut self, settings: &SerialSettings) -> Result<(), TefError>;

    /// Write bytes in order; fragmentation on the wire is allowed
    fn write(&mut self, bytes: &[u8]) -> Result<(), TefError>;

    /// Release the device. The closer reports `Closed` to its callers; the
    /// sink only ever sees asynchronous failures.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Register the single inbound sink
    fn set_sink(&mut self, sink: Arc<dyn ByteSink>);
}

/// Delay before the mock answers a write
const MOCK_RESPONSE_DELAY: Duration = Duration::from_millis(150);

/// In-memory transport that plays the terminal's side of an approved
/// purchase: one transport ACK, then the response frame after a fixed delay.
pub struct MockTransport {
    sink: Option<Arc<dyn ByteSink>>,
    open: Arc<AtomicBool>,
    response_delay: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sink: None,
            open: Arc::new(AtomicBool::new(false)),
            response_delay: MOCK_RESPONSE_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_delay(delay: Duration) -> Self {
        let mut mock = Self::new();
        mock.response_delay = delay;
        mock
    }

    /// The canned approved-purchase frame the mock delivers
    pub fn canned_approval() -> Vec<u8> {
        FrameBuilder::new(PresentationHeader::Purchase)
            .text(1, 6, "917107")
            .numeric(40, 12, 100_000)
            .numeric(41, 12, 1_379)
            .text(42, 10, "001")
            .text(43, 6, "0010")
            .text(46, 6, "150320")
            .text(47, 4, "0142")
            .text(48, 2, "00")
            .text(49, 10, "VISA CR B")
            .text(50, 2, "CR")
            .text(51, 2, "01")
            .text(54, 4, "4627")
            .text(75, 6, "400558")
            .text(76, 4, "1512")
            .build()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn open(&mut self, settings: &SerialSettings) -> Result<(), TefError> {
        if self.open.load(Ordering::SeqCst) {
            return Err(TefError::TransportError(
                "transport already open".to_string(),
            ));
        }
        log::info!("mock transport open on {:?}", settings.port);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TefError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TefError::TransportError("transport not open".to_string()));
        }
        log::trace!("mock transport swallowing {} bytes: {:02x?}", bytes.len(), bytes);
        // A lone ACK is the coordinator acknowledging our frame; the real
        // terminal stays quiet after it.
        if bytes.len() == 1 && bytes[0] == ACK {
            return Ok(());
        }
        let Some(sink) = self.sink.clone() else {
            return Ok(());
        };
        let open = Arc::clone(&self.open);
        let delay = self.response_delay;
        thread::spawn(move || {
            sink.on_bytes(&[ACK]);
            thread::sleep(delay);
            if open.load(Ordering::SeqCst) {
                sink.on_bytes(&MockTransport::canned_approval());
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn set_sink(&mut self, sink: Arc<dyn ByteSink>) {
        self.sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FrameCodec;
    use crate::protocol::response::TerminalResponse;
    use std::sync::Mutex;

    struct Capture {
        chunks: Mutex<Vec<Vec<u8>>>,
    }

    impl ByteSink for Capture {
        fn on_bytes(&self, chunk: &[u8]) {
            self.chunks.lock().unwrap().push(chunk.to_vec());
        }
        fn on_error(&self, _error: TefError) {}
    }

    #[test]
    fn test_canned_approval_is_self_consistent() {
        let frame = MockTransport::canned_approval();
        let decoded = FrameCodec::decode(&frame).expect("canned frame must decode");
        let response = TerminalResponse::from_frame(decoded);
        assert!(response.approved);
        assert_eq!(response.auth_code.as_deref(), Some("917107"));
        assert_eq!(response.amount.as_deref(), Some("000000100000"));
    }

    #[test]
    fn test_reopen_is_an_error() {
        let mut mock = MockTransport::new();
        let settings = SerialSettings::default();
        mock.open(&settings).unwrap();
        assert!(mock.open(&settings).is_err());
    }

    #[test]
    fn test_mock_replies_ack_then_frame() {
        let capture = Arc::new(Capture {
            chunks: Mutex::new(Vec::new()),
        });
        let mut mock = MockTransport::with_delay(Duration::from_millis(10));
        mock.set_sink(capture.clone());
        mock.open(&SerialSettings::default()).unwrap();
        mock.write(b"anything").unwrap();
        thread::sleep(Duration::from_millis(100));
        let chunks = capture.chunks.lock().unwrap();
        assert_eq!(chunks[0], vec![ACK]);
        assert_eq!(chunks[1], MockTransport::canned_approval());
    }
}
