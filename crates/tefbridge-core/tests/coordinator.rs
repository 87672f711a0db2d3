//! Coordinator scenarios: at-most-one transaction, reassembly, ACK handling,
//! timeouts and cancellation, driven through scripted transports.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tefbridge_core::config::{BridgeConfig, SerialSettings};
use tefbridge_core::protocol::{
    ByteSink, MockTransport, PurchaseRequest, SerialTransport, TefError,
    TransactionCoordinator, ACK,
};

/// Transport scripted from the test: records every write and, on the first
/// frame write, plays back a timed sequence of inbound chunks.
struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    sink: Option<Arc<dyn ByteSink>>,
    written: Vec<Vec<u8>>,
    script: Vec<(u64, Vec<u8>)>,
    open: bool,
}

impl SerialTransport for ScriptedTransport {
    fn open(&mut self, _settings: &SerialSettings) -> Result<(), TefError> {
        let mut state = self.state.lock().unwrap();
        if state.open {
            return Err(TefError::TransportError("already open".to_string()));
        }
        state.open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TefError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(TefError::TransportError("not open".to_string()));
        }
        state.written.push(bytes.to_vec());
        if bytes.len() == 1 && bytes[0] == ACK {
            return Ok(());
        }
        let script = std::mem::take(&mut state.script);
        let sink = state.sink.clone();
        drop(state);
        if let Some(sink) = sink {
            thread::spawn(move || {
                for (delay_ms, chunk) in script {
                    thread::sleep(Duration::from_millis(delay_ms));
                    sink.on_bytes(&chunk);
                }
            });
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn set_sink(&mut self, sink: Arc<dyn ByteSink>) {
        self.state.lock().unwrap().sink = Some(sink);
    }
}

fn scripted(
    script: Vec<(u64, Vec<u8>)>,
) -> (Arc<TransactionCoordinator>, Arc<Mutex<ScriptState>>) {
    let state = Arc::new(Mutex::new(ScriptState {
        script,
        ..Default::default()
    }));
    let transport = ScriptedTransport {
        state: Arc::clone(&state),
    };
    let coordinator = Arc::new(TransactionCoordinator::new(
        Box::new(transport),
        BridgeConfig::default(),
    ));
    coordinator.connect("test0").unwrap();
    (coordinator, state)
}

fn request() -> PurchaseRequest {
    PurchaseRequest {
        amount_cents: 100_000,
        tax_cents: 1_379,
        tip_cents: 0,
        iac: 0,
        terminal_id: "001".to_string(),
        transaction_id: "T000000001".to_string(),
        cashier_id: "OSCROM".to_string(),
        send_pan: false,
    }
}

fn outbound_acks(state: &Arc<Mutex<ScriptState>>) -> usize {
    state
        .lock()
        .unwrap()
        .written
        .iter()
        .filter(|w| w.len() == 1 && w[0] == ACK)
        .count()
}

#[test]
fn chunked_frame_with_garbage_reassembles() {
    let frame = MockTransport::canned_approval();
    let script = vec![
        (0, vec![0x55, 0xAA, 0x31]), // line noise, no STX
        (10, frame[..7].to_vec()),
        (10, frame[7..150].to_vec()),
        (10, {
            let mut tail = frame[150..].to_vec();
            tail.extend_from_slice(&[0x99, 0x98]); // trailing garbage
            tail
        }),
    ];
    let (coordinator, state) = scripted(script);
    let response = coordinator
        .send_purchase(&request(), Some(Duration::from_secs(2)))
        .unwrap();
    assert!(response.approved);
    assert_eq!(response.auth_code.as_deref(), Some("917107"));
    assert_eq!(outbound_acks(&state), 1);
}

#[test]
fn second_transaction_fails_fast_with_busy() {
    let (coordinator, _state) = scripted(vec![]);

    let background = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || {
            coordinator.send_purchase(&request(), Some(Duration::from_millis(400)))
        })
    };
    thread::sleep(Duration::from_millis(100));

    // Second call while the first is awaiting
    assert!(matches!(
        coordinator.send_purchase(&request(), Some(Duration::from_millis(400))),
        Err(TefError::Busy)
    ));

    // The first transaction's outcome is unchanged by the rejected call
    assert!(matches!(
        background.join().unwrap(),
        Err(TefError::Timeout)
    ));

    // And the coordinator accepts work again
    assert!(matches!(
        coordinator.send_purchase(&request(), Some(Duration::from_millis(100))),
        Err(TefError::Timeout)
    ));
}

#[test]
fn lone_ack_neither_completes_nor_echoes() {
    let (coordinator, state) = scripted(vec![(0, vec![ACK])]);
    let result = coordinator.send_purchase(&request(), Some(Duration::from_millis(250)));
    assert!(matches!(result, Err(TefError::Timeout)));
    // Only the request frame was written; an inbound ACK is never answered
    assert_eq!(outbound_acks(&state), 0);
    assert_eq!(state.lock().unwrap().written.len(), 1);
}

#[test]
fn timeout_fires_within_window() {
    let (coordinator, _state) = scripted(vec![]);
    let start = Instant::now();
    let result = coordinator.send_purchase(&request(), Some(Duration::from_millis(200)));
    let elapsed = start.elapsed();
    assert!(matches!(result, Err(TefError::Timeout)));
    assert!(elapsed >= Duration::from_millis(190), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "fired late: {elapsed:?}");
}

#[test]
fn late_frame_is_acked_but_dropped() {
    let frame = MockTransport::canned_approval();
    let (coordinator, state) = scripted(vec![(300, frame)]);

    let result = coordinator.send_purchase(&request(), Some(Duration::from_millis(100)));
    assert!(matches!(result, Err(TefError::Timeout)));

    // The response lands after the timeout: still ACKed, not surfaced
    thread::sleep(Duration::from_millis(400));
    assert_eq!(outbound_acks(&state), 1);

    // The coordinator is idle and usable again
    assert!(matches!(
        coordinator.send_purchase(&request(), Some(Duration::from_millis(100))),
        Err(TefError::Timeout)
    ));
}

#[test]
fn disconnect_cancels_pending_with_closed() {
    let (coordinator, _state) = scripted(vec![]);
    let background = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || {
            coordinator.send_purchase(&request(), Some(Duration::from_secs(5)))
        })
    };
    thread::sleep(Duration::from_millis(100));
    coordinator.disconnect();
    assert!(matches!(background.join().unwrap(), Err(TefError::Closed)));
    assert!(!coordinator.status().connected);
}

#[test]
fn corrupt_frame_is_discarded_then_valid_one_completes() {
    let good = MockTransport::canned_approval();
    let mut bad = good.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;

    let (coordinator, state) = scripted(vec![(0, bad), (50, good)]);
    let response = coordinator
        .send_purchase(&request(), Some(Duration::from_secs(2)))
        .unwrap();
    assert!(response.approved);
    // Only the valid frame was acknowledged
    assert_eq!(outbound_acks(&state), 1);
}

#[test]
fn two_frames_in_one_chunk_both_consumed() {
    let frame = MockTransport::canned_approval();
    let mut both = frame.clone();
    both.extend_from_slice(&frame);

    let (coordinator, state) = scripted(vec![(0, both)]);
    let response = coordinator
        .send_purchase(&request(), Some(Duration::from_secs(2)))
        .unwrap();
    assert!(response.approved);

    // The second frame found no pending transaction: ACKed and dropped
    thread::sleep(Duration::from_millis(100));
    assert_eq!(outbound_acks(&state), 2);
}

#[test]
fn mock_transport_end_to_end() {
    let mut config = BridgeConfig::default();
    config.tef.mock_mode = true;
    let coordinator =
        TransactionCoordinator::new(Box::new(MockTransport::new()), config);
    coordinator.connect("mock0").unwrap();

    let response = coordinator
        .send_purchase(&request(), Some(Duration::from_secs(2)))
        .unwrap();
    assert!(response.approved);
    assert_eq!(response.amount.as_deref(), Some("000000100000"));
    assert_eq!(response.masked_pan.as_deref(), Some("400558******1512"));

    let status = coordinator.status();
    assert!(status.connected);
    assert_eq!(status.port.as_deref(), Some("mock0"));
    coordinator.disconnect();
}
