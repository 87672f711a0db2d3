//! Frame encoding/decoding
//!
//! Implements the TEF II frame format used on the wire in both directions:
//!
//! ```text
//! STX | LENGTH(4) | TRANSPORT(10) | PRESENTATION(7) [ SEP TLV ]* | ETX | LRC
//! ```
//!
//! - `LENGTH` is the byte count from the byte after `LENGTH` through `ETX`
//!   inclusive, written as four decimal ASCII digits (`"0109"` = `30 31 30 39`).
//! - Each TLV is `TYPE(2 ASCII digits) | LEN(4 ASCII hex digits) | VALUE`.
//! - `LRC` is the XOR of every byte from the start of `LENGTH` through `ETX`.

use std::collections::BTreeMap;

use super::{TefError, MAX_FRAME_SIZE};

/// Start of text
pub const STX: u8 = 0x02;
/// End of text
pub const ETX: u8 = 0x03;
/// TLV field separator
pub const SEPARATOR: u8 = 0x1C;
/// Transport-level acknowledgement
pub const ACK: u8 = 0x06;
/// Transport-level negative acknowledgement
pub const NACK: u8 = 0x15;

/// Fixed transport header carried by every frame (decimal ASCII, not BCD)
pub const TRANSPORT_HEADER: &[u8; 10] = b"6000000000";

/// Presentation headers understood by the terminal.
///
/// Only `Purchase`, `Reversal` and `Handshake` have code paths behind them;
/// the rest are dictionary entries kept for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationHeader {
    Purchase,
    Reversal,
    Handshake,
    BalanceInquiry,
    CashAdvance,
    Close,
    Coupon,
    BonoRecharge,
}

impl PresentationHeader {
    /// The 7-byte ASCII header written on the wire
    pub fn as_bytes(&self) -> &'static [u8; 7] {
        match self {
            PresentationHeader::Purchase => b"1000000",
            PresentationHeader::Reversal => b"1002000",
            PresentationHeader::Handshake => b"1000  0",
            PresentationHeader::BalanceInquiry => b"1100000",
            PresentationHeader::CashAdvance => b"1003000",
            PresentationHeader::Close => b"1500000",
            PresentationHeader::Coupon => b"1007000",
            PresentationHeader::BonoRecharge => b"1008000",
        }
    }
}

/// XOR of a byte range, as used for the trailing LRC
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// One TLV field extracted from a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    /// The two raw type bytes as received
    pub raw_type: [u8; 2],
    /// Length declared in the TLV header
    pub declared_len: u16,
    /// Raw value bytes
    pub value: Vec<u8>,
    ascii: String,
}

impl ParsedField {
    fn new(raw_type: [u8; 2], declared_len: u16, value: Vec<u8>) -> Self {
        let ascii = String::from_utf8_lossy(&value).trim().to_string();
        Self {
            raw_type,
            declared_len,
            value,
            ascii,
        }
    }

    /// Cached ASCII view of the value with padding trimmed
    pub fn ascii_trimmed(&self) -> &str {
        &self.ascii
    }

    /// Map key: the semantic field number (`"48"`) when both type bytes are
    /// ASCII digits, otherwise the 4-hex-digit raw form (`"3777"`)
    pub fn key(&self) -> String {
        if self.raw_type.iter().all(|b| b.is_ascii_digit()) {
            String::from_utf8_lossy(&self.raw_type).into_owned()
        } else {
            format!("{:02x}{:02x}", self.raw_type[0], self.raw_type[1])
        }
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Transport + presentation header bytes, as received
    pub header: Vec<u8>,
    /// Parsed TLV fields keyed by field number
    pub fields: BTreeMap<String, ParsedField>,
}

/// Builder for outbound frames.
///
/// Numeric fields are zero-padded on the left, text fields space-padded on
/// the right; over-wide values are truncated on the right.
pub struct FrameBuilder {
    body: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(header: PresentationHeader) -> Self {
        let mut body = Vec::with_capacity(192);
        body.extend_from_slice(TRANSPORT_HEADER);
        body.extend_from_slice(header.as_bytes());
        Self { body }
    }

    /// Append a zero-padded decimal field
    pub fn numeric(self, field: u8, width: usize, value: u64) -> Self {
        self.raw_value(field, width, format!("{value:0width$}").as_bytes(), b'0')
    }

    /// Append a space-padded ASCII field
    pub fn text(self, field: u8, width: usize, value: &str) -> Self {
        self.raw_value(field, width, value.as_bytes(), b' ')
    }

    fn raw_value(mut self, field: u8, width: usize, value: &[u8], pad: u8) -> Self {
        self.body.push(SEPARATOR);
        self.body
            .extend_from_slice(format!("{field:02}").as_bytes());
        self.body
            .extend_from_slice(format!("{width:04X}").as_bytes());
        if value.len() >= width {
            self.body.extend_from_slice(&value[..width]);
        } else if pad == b'0' {
            self.body.resize(self.body.len() + width - value.len(), pad);
            self.body.extend_from_slice(value);
        } else {
            self.body.extend_from_slice(value);
            self.body.resize(self.body.len() + width - value.len(), pad);
        }
        self
    }

    /// Seal the frame: length prefix first, then ETX, then the LRC over
    /// `LENGTH || body || ETX`
    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.body.len() + 7);
        frame.push(STX);
        frame.extend_from_slice(format!("{:04}", self.body.len() + 1).as_bytes());
        frame.extend_from_slice(&self.body);
        frame.push(ETX);
        let check = lrc(&frame[1..]);
        frame.push(check);
        frame
    }
}

/// Stateless encoder/decoder for TEF II frames
pub struct FrameCodec;

impl FrameCodec {
    /// Validate the envelope of a frame: STX, ETX, LRC.
    ///
    /// Returns the index of the ETX byte on success.
    pub fn validate(frame: &[u8]) -> Result<usize, TefError> {
        if frame.len() < 5 {
            return Err(TefError::ShortFrame {
                actual: frame.len(),
            });
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TefError::MalformedFrame(format!(
                "frame exceeds {MAX_FRAME_SIZE} bytes"
            )));
        }
        if frame[0] != STX {
            return Err(TefError::MalformedFrame("missing STX".to_string()));
        }
        let etx = frame
            .iter()
            .skip(1)
            .position(|&b| b == ETX)
            .map(|p| p + 1)
            .ok_or_else(|| TefError::MalformedFrame("missing ETX".to_string()))?;
        if etx + 1 >= frame.len() {
            return Err(TefError::MalformedFrame(
                "frame ends before LRC".to_string(),
            ));
        }
        let expected = lrc(&frame[1..=etx]);
        let received = frame[etx + 1];
        if expected != received {
            return Err(TefError::ChecksumMismatch { expected, received });
        }
        // The length prefix is informational on decode; a disagreement with
        // the located ETX is logged, not fatal.
        match std::str::from_utf8(&frame[1..5])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(declared) if declared == etx - 4 => {}
            Some(declared) => log::warn!(
                "length prefix declares {declared} bytes, frame carries {}",
                etx - 4
            ),
            None => log::warn!("non-decimal length prefix {:02x?}", &frame[1..5]),
        }
        Ok(etx)
    }

    /// Decode a frame into its TLV fields.
    ///
    /// Scanning is separator-driven and accepts both TLV length encodings
    /// seen in the field: the canonical 4-hex-ASCII form this codec emits
    /// and the legacy 2-byte big-endian form. A canonical TLV whose declared
    /// length disagrees with the bytes present stops the scan; the fields
    /// parsed so far are kept.
    pub fn decode(frame: &[u8]) -> Result<DecodedFrame, TefError> {
        let etx = Self::validate(frame)?;
        if etx < 5 {
            return Err(TefError::MalformedFrame(
                "frame too short for headers".to_string(),
            ));
        }
        let body = &frame[5..etx];
        let mut segments = body.split(|&b| b == SEPARATOR);
        let header = segments.next().unwrap_or_default().to_vec();
        let mut fields = BTreeMap::new();
        for segment in segments {
            match parse_tlv(segment) {
                Some(field) => {
                    fields.insert(field.key(), field);
                }
                None => {
                    // Truncated header or length/wire disagreement: stop
                    // scanning, keep what we have
                    log::warn!("malformed TLV segment {:02x?}, scan stopped", segment);
                    break;
                }
            }
        }
        Ok(DecodedFrame { header, fields })
    }

    /// Encode a purchase request
    pub fn encode_purchase(req: &super::PurchaseRequest) -> Result<Vec<u8>, TefError> {
        req.validate()?;
        Ok(FrameBuilder::new(PresentationHeader::Purchase)
            .numeric(40, 12, req.amount_cents)
            .numeric(41, 12, req.tax_cents)
            .text(42, 10, &req.terminal_id)
            .text(53, 10, &req.transaction_id)
            .numeric(81, 12, req.tip_cents)
            .numeric(82, 12, req.iac)
            .text(83, 12, &req.cashier_id)
            .numeric(84, 12, 0)
            .build())
    }

    /// Encode a reversal request
    pub fn encode_reversal(req: &super::ReversalRequest) -> Result<Vec<u8>, TefError> {
        req.validate()?;
        Ok(FrameBuilder::new(PresentationHeader::Reversal)
            .text(42, 10, &req.terminal_id)
            .text(43, 6, &req.receipt_number)
            .text(53, 10, &req.transaction_id)
            .text(83, 12, &req.cashier_id)
            .numeric(84, 12, 0)
            .build())
    }

    /// Encode the optional pre-purchase handshake frame (no fields)
    pub fn encode_handshake() -> Vec<u8> {
        FrameBuilder::new(PresentationHeader::Handshake).build()
    }
}

/// Parse one separator-delimited TLV segment.
///
/// Returns `None` to stop the scan: when the segment is too short to hold a
/// TLV header, or when a canonical length disagrees with the bytes actually
/// present (the value would run past or fall short of the segment).
fn parse_tlv(segment: &[u8]) -> Option<ParsedField> {
    if segment.len() < 4 {
        return None;
    }
    let raw_type = [segment[0], segment[1]];
    // Canonical form: 4 hex ASCII digits after the type. Once the length
    // bytes read as hex ASCII the segment is canonical, and a declared
    // length that disagrees with the wire is a truncated or corrupted TLV;
    // it must not be reinterpreted as the legacy form.
    if segment.len() >= 6 && segment[2..6].iter().all(|b| b.is_ascii_hexdigit()) {
        let declared = u16::from_str_radix(&String::from_utf8_lossy(&segment[2..6]), 16).ok()?;
        if declared as usize != segment.len() - 6 {
            return None;
        }
        return Some(ParsedField::new(raw_type, declared, segment[6..].to_vec()));
    }
    // Legacy form: 2-byte big-endian length (the raw high byte is never hex
    // ASCII in captured frames); clamp the value to the segment
    let declared = u16::from_be_bytes([segment[2], segment[3]]);
    let take = (declared as usize).min(segment.len() - 4);
    Some(ParsedField::new(
        raw_type,
        declared,
        segment[4..4 + take].to_vec(),
    ))
}
