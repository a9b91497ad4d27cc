// Infrastructure adapters for application ports

pub mod envelope_output_adapter;

pub use envelope_output_adapter::{FileEnvelopeOutputAdapter, StdoutEnvelopeOutputAdapter};
