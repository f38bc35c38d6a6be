//! CSV adapters used by the batch harness.

pub mod intent_reader;
pub mod purchase_writer;
