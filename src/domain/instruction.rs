use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One payment instruction as uploaded by the user.
///
/// The engine treats the payload as opaque apart from the validation rules;
/// it is handed to the payment backend untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstruction {
    pub recipient: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PaymentInstruction {
    pub fn new(recipient: impl Into<String>, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount,
            currency: currency.into(),
            description: None,
        }
    }
}

/// Key passed to the payment backend so that a retried submission cannot
/// move money twice. Stable for a given `(job, item)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acknowledgement of a payment accepted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub external_tx_id: String,
}
