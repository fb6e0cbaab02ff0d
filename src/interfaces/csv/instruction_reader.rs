use crate::domain::instruction::PaymentInstruction;
use crate::error::{BatchError, Result};
use std::io::Read;

/// Reads payment instructions from a CSV source with a
/// `recipient,amount,currency[,description]` header.
///
/// Whitespace around fields is trimmed and the description column may be
/// omitted.
pub struct InstructionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> InstructionReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes the rows.
    pub fn instructions(self) -> impl Iterator<Item = Result<PaymentInstruction>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BatchError::from))
    }

    /// Reads the whole batch, stopping at the first malformed row.
    ///
    /// A batch is submitted as a unit, so a row that cannot be parsed aborts
    /// the upload instead of being skipped.
    pub fn read_all(self) -> Result<Vec<PaymentInstruction>> {
        self.instructions().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "recipient, amount, currency, description\n\
                    alice, 10.00, USD, rent\n\
                    bob, 2.5, EUR,";
        let instructions = InstructionReader::new(data.as_bytes()).read_all().unwrap();

        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].amount, dec!(10.00));
        assert_eq!(instructions[0].description.as_deref(), Some("rent"));
        assert_eq!(instructions[1].recipient, "bob");
        assert_eq!(instructions[1].description, None);
    }

    #[test]
    fn test_description_column_is_optional() {
        let data = "recipient,amount,currency\ncarol,1,GBP";
        let instructions = InstructionReader::new(data.as_bytes()).read_all().unwrap();
        assert_eq!(instructions[0].currency, "GBP");
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "recipient, amount, currency\nalice, lots, USD\nbob, 1, USD";
        let results: Vec<Result<PaymentInstruction>> =
            InstructionReader::new(data.as_bytes()).instructions().collect();
        assert!(matches!(results[0], Err(BatchError::Csv(_))));
        assert!(results[1].is_ok());

        assert!(InstructionReader::new(data.as_bytes()).read_all().is_err());
    }
}
