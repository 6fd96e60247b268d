pub mod settlement_records;
