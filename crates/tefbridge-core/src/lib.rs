//! # TefBridge Core Library
//!
//! Bridge between a point-of-sale application and a Credibanco TEF II
//! card-payment terminal (datáfono) attached over a serial line.
//!
//! This library provides:
//! - TEF II frame encoding/decoding (STX/ETX framing, TLV fields, LRC)
//! - Serial transport abstraction with a real `serialport` adapter and an
//!   in-memory mock for development without hardware
//! - A transaction coordinator that drives the half-duplex exchange with
//!   ACK handshaking, buffered reassembly and per-transaction timeouts
//! - Configuration loading for the serial link and protocol defaults
//!
//! ## Example
//!
//! ```rust,ignore
//! use tefbridge_core::config::BridgeConfig;
//! use tefbridge_core::protocol::{PurchaseRequest, SerialPortTransport, TransactionCoordinator};
//!
//! let config = BridgeConfig::from_file("bridge.json")?;
//! let coordinator = TransactionCoordinator::new(
//!     Box::new(SerialPortTransport::new()),
//!     config.clone(),
//! );
//! coordinator.connect(&config.serial.port)?;
//!
//! let response = coordinator.send_purchase(&request, None)?;
//! println!("approved: {} ({})", response.approved, response.message);
//! ```

pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BridgeConfig, SerialSettings, TefSettings};
    pub use crate::protocol::{
        FrameCodec, MockTransport, PurchaseRequest, ReversalRequest, SerialPortTransport,
        TefError, TerminalResponse, TransactionCoordinator,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
