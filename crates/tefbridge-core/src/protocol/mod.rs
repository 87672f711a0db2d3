//! TEF II Protocol Communication
//!
//! Implements the Credibanco TEF II serial protocol spoken by the datáfono.
//!
//! Frames are STX/ETX delimited with a 4-digit ASCII length prefix, a fixed
//! transport header, a 7-byte presentation header, separator-prefixed TLV
//! fields and a trailing XOR LRC.

mod coordinator;
mod error;
mod frame;
mod requests;
mod response;
pub mod serial;
pub mod transport;

pub use coordinator::{BridgeStatus, TransactionCoordinator};
pub use error::TefError;
pub use frame::{
    lrc, DecodedFrame, FrameBuilder, FrameCodec, ParsedField, PresentationHeader, ACK, ETX, NACK,
    SEPARATOR, STX, TRANSPORT_HEADER,
};
pub use requests::{PurchaseRequest, ReversalRequest};
pub use response::{decline_message, TerminalResponse};
pub use serial::{list_ports, PortInfo, SerialPortTransport};
pub use transport::{ByteSink, MockTransport, SerialTransport};

/// Default baud rate for the terminal link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-transaction timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Upper bound on the reassembly buffer; anything larger than this without a
/// complete frame is line noise and gets dropped
pub const MAX_FRAME_SIZE: usize = 4096;
