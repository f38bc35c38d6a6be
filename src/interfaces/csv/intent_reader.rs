use crate::error::{AppError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of the batch input: a subject who wants to buy an item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PurchaseIntent {
    pub subject: String,
    pub email: String,
    pub item: String,
    /// Validated by the orchestrator, so non-positive values still parse.
    pub amount: Decimal,
}

/// Reads purchase intents from a CSV source.
///
/// Whitespace around fields is trimmed and short or long records are
/// accepted and reported per row.
pub struct IntentReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> IntentReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes intents, one `Result` per record.
    pub fn intents(self) -> impl Iterator<Item = Result<PurchaseIntent>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(AppError::from))
    }
}
