// Data processing pipeline: processing stages and reference storage

pub mod processing;
pub mod storage;
