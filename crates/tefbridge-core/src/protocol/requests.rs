//! Transaction requests
//!
//! Typed requests accepted from the POS layer, validated before encoding.

use serde::{Deserialize, Serialize};

use super::TefError;

/// Operator-initiated sale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Total amount in cents, must be greater than zero
    pub amount_cents: u64,
    /// Tax portion in cents
    #[serde(default)]
    pub tax_cents: u64,
    /// Tip / cash back in cents
    #[serde(default)]
    pub tip_cents: u64,
    /// Issuer action code value, passed through uninterpreted
    #[serde(default)]
    pub iac: u64,
    /// Terminal identifier, up to 10 characters
    pub terminal_id: String,
    /// Transaction identifier, unique per session, up to 10 characters
    pub transaction_id: String,
    /// Cashier identifier, up to 12 characters
    pub cashier_id: String,
    /// Carried on the request for forward compatibility; the wire header is
    /// identical either way (vendor documentation pending)
    #[serde(default)]
    pub send_pan: bool,
}

impl PurchaseRequest {
    pub fn validate(&self) -> Result<(), TefError> {
        if self.amount_cents == 0 {
            return Err(TefError::InvalidRequest(
                "amount_cents must be greater than zero".to_string(),
            ));
        }
        if self.transaction_id.is_empty() {
            return Err(TefError::InvalidRequest(
                "transaction_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Void of a prior transaction, referenced by its receipt number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalRequest {
    /// Receipt number of the transaction to void, exactly 6 characters
    pub receipt_number: String,
    pub terminal_id: String,
    pub transaction_id: String,
    pub cashier_id: String,
}

impl ReversalRequest {
    pub fn validate(&self) -> Result<(), TefError> {
        if self.receipt_number.len() != 6 {
            return Err(TefError::InvalidRequest(
                "receipt_number must be exactly 6 characters".to_string(),
            ));
        }
        if self.transaction_id.is_empty() {
            return Err(TefError::InvalidRequest(
                "transaction_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
