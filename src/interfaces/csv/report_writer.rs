use crate::domain::job::{BatchItem, ItemStatus};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct ReportRow<'a> {
    index: u32,
    recipient: &'a str,
    amount: Decimal,
    currency: &'a str,
    status: &'static str,
    attempts: u32,
    external_tx_id: Option<&'a str>,
    error_code: Option<&'a str>,
    error_message: Option<&'a str>,
}

impl<'a> From<&'a BatchItem> for ReportRow<'a> {
    fn from(item: &'a BatchItem) -> Self {
        let (external_tx_id, error) = match &item.status {
            ItemStatus::Completed { external_tx_id } => (Some(external_tx_id.as_str()), None),
            ItemStatus::Failed { error } => (None, Some(error)),
            _ => (None, item.last_error.as_ref()),
        };
        Self {
            index: item.index,
            recipient: &item.payload.recipient,
            amount: item.payload.amount,
            currency: &item.payload.currency,
            status: item.status.label(),
            attempts: item.attempts,
            external_tx_id,
            error_code: error.map(|error| error.code.as_str()),
            error_message: error.map(|error| error.message.as_str()),
        }
    }
}

/// Writes one CSV row per item with its final outcome.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Rows are written in submission order regardless of completion order.
    pub fn write_items<'a>(&mut self, items: impl IntoIterator<Item = &'a BatchItem>) -> Result<()> {
        let mut items: Vec<&BatchItem> = items.into_iter().collect();
        items.sort_by_key(|item| item.index);
        for item in items {
            self.writer.serialize(ReportRow::from(item))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
