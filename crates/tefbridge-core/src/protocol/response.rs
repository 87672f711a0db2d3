//! Terminal responses
//!
//! Maps a decoded frame onto the outcome the POS layer consumes. Approval is
//! strict: field 48 must exist and trim to `"00"`; anything else, including a
//! missing field 48, is a decline.

use std::collections::BTreeMap;

use serde::Serialize;

use super::frame::{DecodedFrame, ParsedField};

// Response field numbers
const FIELD_AUTH_CODE: &str = "01";
const FIELD_AMOUNT: &str = "40";
const FIELD_RECEIPT_NUMBER: &str = "43";
const FIELD_TRANSACTION_DATE: &str = "46";
const FIELD_TRANSACTION_TIME: &str = "47";
const FIELD_RESPONSE_CODE: &str = "48";
const FIELD_FRANCHISE: &str = "49";
const FIELD_ACCOUNT_TYPE: &str = "50";
const FIELD_PAN_PREFIX: &str = "75";
const FIELD_PAN_SUFFIX: &str = "76";

/// Decoded outcome of a transaction
#[derive(Debug, Clone, Serialize)]
pub struct TerminalResponse {
    pub approved: bool,
    /// Two-character response code from field 48, empty when absent
    pub response_code: String,
    /// Human-readable message (Spanish, per the terminal dictionary)
    pub message: String,
    pub auth_code: Option<String>,
    pub amount: Option<String>,
    pub franchise: Option<String>,
    pub account_type: Option<String>,
    pub last4: Option<String>,
    pub masked_pan: Option<String>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub transaction_time: Option<String>,
    /// Every field the terminal sent, including unknown ones
    #[serde(skip)]
    pub fields: BTreeMap<String, ParsedField>,
}

impl TerminalResponse {
    /// Build the response from a decoded frame
    pub fn from_frame(frame: DecodedFrame) -> Self {
        let fields = frame.fields;
        let trimmed = |key: &str| fields.get(key).map(|f| f.ascii_trimmed().to_string());

        let response_code = trimmed(FIELD_RESPONSE_CODE).unwrap_or_default();
        let approved = response_code == "00";
        let message = if approved {
            "Transacción aprobada".to_string()
        } else {
            decline_message(&response_code)
        };
        let masked_pan = match (trimmed(FIELD_PAN_PREFIX), trimmed(FIELD_PAN_SUFFIX)) {
            (Some(prefix), Some(suffix)) => Some(format!("{prefix}******{suffix}")),
            _ => None,
        };

        Self {
            approved,
            message,
            auth_code: trimmed(FIELD_AUTH_CODE),
            amount: trimmed(FIELD_AMOUNT),
            franchise: trimmed(FIELD_FRANCHISE),
            account_type: trimmed(FIELD_ACCOUNT_TYPE),
            last4: trimmed(FIELD_PAN_SUFFIX),
            masked_pan,
            receipt_number: trimmed(FIELD_RECEIPT_NUMBER),
            transaction_date: trimmed(FIELD_TRANSACTION_DATE),
            transaction_time: trimmed(FIELD_TRANSACTION_TIME),
            response_code,
            fields,
        }
    }
}

/// Human message for a declined response code (field 48)
pub fn decline_message(code: &str) -> String {
    let message = match code {
        "01" | "02" => "Comuníquese con el emisor",
        "03" => "Comercio no registrado",
        "04" | "07" => "Retener tarjeta",
        "05" => "Transacción denegada",
        "06" | "96" => "Error en la transacción",
        "12" => "Transacción inválida",
        "13" => "Monto inválido",
        "14" => "Tarjeta inválida",
        "15" => "Emisor inválido",
        "19" => "Reintente la transacción",
        "30" => "Error de formato",
        "41" => "Tarjeta perdida",
        "43" => "Tarjeta robada",
        "51" => "Fondos insuficientes",
        "54" => "Tarjeta vencida",
        "55" => "PIN inválido",
        "57" | "58" => "Transacción no permitida",
        "59" => "Sospecha de fraude",
        "61" | "65" => "Excede el límite permitido",
        "62" => "Tarjeta restringida",
        "63" => "Violación de seguridad",
        "75" => "Intentos de PIN excedidos",
        "76" => "Transacción original no encontrada",
        "77" => "El monto no coincide",
        "78" => "Cuenta inexistente",
        "85" => "Sin motivo de rechazo",
        "91" => "Emisor no disponible",
        "92" => "Destino inalcanzable",
        "93" => "No se puede completar",
        "94" => "Transacción duplicada",
        "99" => "Problema de comunicación",
        other => return format!("Código desconocido: {other}"),
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{FrameBuilder, FrameCodec, PresentationHeader};

    fn response_frame(code: &str) -> DecodedFrame {
        let frame = FrameBuilder::new(PresentationHeader::Purchase)
            .text(1, 6, "917107")
            .numeric(40, 12, 100_000)
            .text(48, 2, code)
            .text(49, 10, "VISA CR B")
            .text(50, 2, "CR")
            .text(75, 6, "400558")
            .text(76, 4, "1512")
            .build();
        FrameCodec::decode(&frame).unwrap()
    }

    #[test]
    fn test_approved_iff_code_00() {
        let response = TerminalResponse::from_frame(response_frame("00"));
        assert!(response.approved);
        assert_eq!(response.response_code, "00");
        assert_eq!(response.auth_code.as_deref(), Some("917107"));

        let response = TerminalResponse::from_frame(response_frame("51"));
        assert!(!response.approved);
        assert_eq!(response.message, "Fondos insuficientes");
    }

    #[test]
    fn test_missing_code_declines() {
        let frame = FrameBuilder::new(PresentationHeader::Purchase)
            .numeric(40, 12, 100_000)
            .build();
        let response = TerminalResponse::from_frame(FrameCodec::decode(&frame).unwrap());
        assert!(!response.approved);
        assert!(response.response_code.is_empty());
    }

    #[test]
    fn test_masked_pan_shape() {
        let response = TerminalResponse::from_frame(response_frame("00"));
        assert_eq!(response.masked_pan.as_deref(), Some("400558******1512"));
        assert_eq!(response.last4.as_deref(), Some("1512"));
    }

    #[test]
    fn test_decline_dictionary() {
        assert_eq!(decline_message("05"), "Transacción denegada");
        assert_eq!(decline_message("54"), "Tarjeta vencida");
        assert_eq!(decline_message("91"), "Emisor no disponible");
        assert_eq!(decline_message("XX"), "Código desconocido: XX");
    }
}
