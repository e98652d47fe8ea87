//! CSV-backed strategy configuration source.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gridline_broker::StrategySource;
use gridline_core::RawStrategyRow;

/// Reads one strategy row per CSV record, headers naming the fields.
///
/// The file is re-read in full every cycle so sheet edits take effect
/// without a restart. Typing and validation happen later, in the
/// reconciler; this source only carries strings.
pub struct CsvStrategySource {
    path: PathBuf,
}

impl CsvStrategySource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_rows(&self) -> Result<Vec<RawStrategyRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let headers = reader.headers().context("strategies file has no header")?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("malformed csv record")?;
            let mut row = RawStrategyRow::new();
            for (header, value) in headers.iter().zip(record.iter()) {
                row.set(header, value);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl StrategySource for CsvStrategySource {
    async fn fetch_rows(&self) -> Result<Vec<RawStrategyRow>> {
        let path = self.path.clone();
        let source = Self { path };
        tokio::task::spawn_blocking(move || source.read_rows())
            .await
            .context("csv read task failed")?
    }
}
