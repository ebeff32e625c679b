use crate::ingest::provider::SnapshotProvider;
use crate::ingest::types::RawSnapshot;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Reads snapshots from local CSV or JSON files, either one file per trade date in a
/// directory (`<dir>/<trade_date>.csv|.json`) or a single fixed file.
#[derive(Debug, Clone)]
pub struct FileSnapshotProvider {
    source: FileSource,
}

#[derive(Debug, Clone)]
enum FileSource {
    Dir(PathBuf),
    File(PathBuf),
}

impl FileSnapshotProvider {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: FileSource::Dir(dir.into()),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: FileSource::File(path.into()),
        }
    }

    fn candidates(&self, trade_date: &str) -> Vec<PathBuf> {
        match &self.source {
            FileSource::File(p) => vec![p.clone()],
            FileSource::Dir(dir) => {
                let stem = trade_date.trim();
                vec![
                    dir.join(format!("{stem}.csv")),
                    dir.join(format!("{stem}.json")),
                ]
            }
        }
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for FileSnapshotProvider {
    fn provider_name(&self) -> &'static str {
        "local_file"
    }

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<RawSnapshot> {
        anyhow::ensure!(
            !trade_date.contains(['/', '\\']) || matches!(self.source, FileSource::File(_)),
            "trade date must not contain path separators"
        );

        for path in self.candidates(trade_date) {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let snapshot = parse_snapshot_bytes(&path, &bytes)?;
            tracing::debug!(path = %path.display(), rows = snapshot.len(), "loaded snapshot file");
            return Ok(snapshot);
        }

        anyhow::bail!("no snapshot file found for trade date {trade_date:?}")
    }
}

/// Parses by extension: `.json` as an array of row objects, anything else as CSV.
pub fn parse_snapshot_bytes(path: &Path, bytes: &[u8]) -> Result<RawSnapshot> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        let v: Value = serde_json::from_slice(bytes)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let records = v
            .as_array()
            .with_context(|| format!("{} must hold a JSON array of rows", path.display()))?;
        RawSnapshot::from_json_records(records)
    } else {
        RawSnapshot::from_csv_reader(bytes)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}
