//! Statement ingestion pipeline.

pub mod processor;

pub use processor::{process_statement, process_statement_dir};
