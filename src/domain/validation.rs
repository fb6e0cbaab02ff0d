//! Structural and business-rule checks run on a batch before it may execute.
//!
//! Validation is pure: the same instructions and policy always yield the same
//! issues, in the same order (item issues by index, then batch-level issues).

use crate::domain::instruction::PaymentInstruction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    MissingRecipient,
    NonPositiveAmount,
    AmountAboveLimit,
    UnsupportedCurrency,
    EmptyBatch,
    TooManyItems,
    BatchTotalExceeded,
    ConcurrencyOutOfRange,
    MissingSchedule,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One violated rule. `item_index` is `None` for batch-level rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub item_index: Option<u32>,
    pub field: String,
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn for_item(
        index: u32,
        field: &str,
        code: IssueCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_index: Some(index),
            field: field.to_string(),
            code,
            message: message.into(),
        }
    }

    pub fn for_batch(field: &str, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            item_index: None,
            field: field.to_string(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item_index {
            Some(index) => write!(f, "item {index}, {}: {} ({})", self.field, self.message, self.code),
            None => write!(f, "batch, {}: {} ({})", self.field, self.message, self.code),
        }
    }
}

/// Limits applied by [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub max_amount_per_item: Decimal,
    pub allowed_currencies: Vec<String>,
    pub max_items: usize,
    pub max_batch_total: Decimal,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_amount_per_item: dec!(10000),
            allowed_currencies: vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()],
            max_items: 1_000,
            max_batch_total: dec!(1000000),
        }
    }
}

/// Checks every instruction and the batch as a whole, collecting all issues.
///
/// An empty result means the batch is valid.
pub fn validate(instructions: &[PaymentInstruction], policy: &ValidationPolicy) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for (index, instruction) in instructions.iter().enumerate() {
        check_item(index as u32, instruction, policy, &mut issues);
    }

    if instructions.is_empty() {
        issues.push(ValidationIssue::for_batch(
            "items",
            IssueCode::EmptyBatch,
            "a batch must contain at least one payment",
        ));
    }

    if instructions.len() > policy.max_items {
        issues.push(ValidationIssue::for_batch(
            "items",
            IssueCode::TooManyItems,
            format!(
                "batch has {} payments, the limit is {}",
                instructions.len(),
                policy.max_items
            ),
        ));
    }

    // Non-positive amounts are already reported per item and do not offset the total.
    let total: Decimal = instructions
        .iter()
        .map(|instruction| instruction.amount)
        .filter(|amount| *amount > Decimal::ZERO)
        .sum();
    if total > policy.max_batch_total {
        issues.push(ValidationIssue::for_batch(
            "totalAmount",
            IssueCode::BatchTotalExceeded,
            format!(
                "batch total {total} exceeds the ceiling of {}",
                policy.max_batch_total
            ),
        ));
    }

    issues
}

fn check_item(
    index: u32,
    instruction: &PaymentInstruction,
    policy: &ValidationPolicy,
    issues: &mut Vec<ValidationIssue>,
) {
    if instruction.recipient.trim().is_empty() {
        issues.push(ValidationIssue::for_item(
            index,
            "recipient",
            IssueCode::MissingRecipient,
            "recipient identifier is required",
        ));
    }

    if instruction.amount <= Decimal::ZERO {
        issues.push(ValidationIssue::for_item(
            index,
            "amount",
            IssueCode::NonPositiveAmount,
            format!("amount must be greater than zero, got {}", instruction.amount),
        ));
    } else if instruction.amount > policy.max_amount_per_item {
        issues.push(ValidationIssue::for_item(
            index,
            "amount",
            IssueCode::AmountAboveLimit,
            format!(
                "amount {} exceeds the per-payment limit of {}",
                instruction.amount, policy.max_amount_per_item
            ),
        ));
    }

    if !policy
        .allowed_currencies
        .iter()
        .any(|currency| *currency == instruction.currency)
    {
        issues.push(ValidationIssue::for_item(
            index,
            "currency",
            IssueCode::UnsupportedCurrency,
            format!("currency '{}' is not supported", instruction.currency),
        ));
    }
}
