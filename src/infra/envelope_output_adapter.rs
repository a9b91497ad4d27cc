use anyhow::Context;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::ports::EnvelopeOutputPort;
use crate::envelope::OutputEnvelope;

/// Writes each envelope as pretty-printed JSON to one file, replacing it
pub struct FileEnvelopeOutputAdapter {
    path: PathBuf,
}

impl FileEnvelopeOutputAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl EnvelopeOutputPort for FileEnvelopeOutputAdapter {
    async fn write_envelope(&self, envelope: &OutputEnvelope) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, envelope)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!(
            "Wrote {} records (run {}) to {}",
            envelope.record_count,
            envelope.run_id,
            self.path.display()
        );
        Ok(())
    }
}

/// Prints each envelope to stdout
pub struct StdoutEnvelopeOutputAdapter;

#[async_trait::async_trait]
impl EnvelopeOutputPort for StdoutEnvelopeOutputAdapter {
    async fn write_envelope(&self, envelope: &OutputEnvelope) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, envelope)?;
        handle.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_file_adapter_writes_readable_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("envelope.json");
        let adapter = FileEnvelopeOutputAdapter::new(&path).unwrap();

        let envelope = OutputEnvelope::new(
            "generic",
            "generic_fields",
            Utc::now(),
            vec![crate::domain::test_support::record("Zopa Bank", Some(4.0))],
            None,
        );
        adapter.write_envelope(&envelope).await.unwrap();

        let written: OutputEnvelope =
            serde_json::from_str(&std::fs::read_to_string(adapter.path()).unwrap()).unwrap();
        assert_eq!(written, envelope);
    }
}
