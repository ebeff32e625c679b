use crate::pipeline::enrich::{header_for, EnrichedRow};
use crate::pipeline::schema::CanonicalColumns;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

pub const SHARED_EXPORT_FILE: &str = "current_page.csv";

/// Per-request exports kept on disk, the newest one included.
pub const DEFAULT_KEEP_EXPORTS: usize = 20;

const PER_REQUEST_PREFIX: &str = "page-";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// One file per request, downloaded by id.
    #[default]
    PerRequest,
    /// A single file overwritten by every request; last writer wins.
    Shared,
}

impl FromStr for ExportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_request" | "request" | "session" => Ok(ExportMode::PerRequest),
            "shared" | "single" => Ok(ExportMode::Shared),
            other => anyhow::bail!("unknown export mode {other:?} (expected per_request or shared)"),
        }
    }
}

impl ExportMode {
    /// `EXPORT_MODE`, or the default when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var("EXPORT_MODE") {
            Ok(s) if !s.trim().is_empty() => s.parse(),
            _ => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportHandle {
    /// Set in per-request mode; `None` means the shared file.
    pub id: Option<Uuid>,
    pub file_name: String,
    pub rows: usize,
}

/// Writes the displayed page to CSV in a fixed directory.
#[derive(Debug, Clone)]
pub struct PageExporter {
    dir: PathBuf,
    mode: ExportMode,
    keep: usize,
}

impl PageExporter {
    pub fn new(dir: impl Into<PathBuf>, mode: ExportMode) -> Self {
        Self {
            dir: dir.into(),
            mode,
            keep: DEFAULT_KEEP_EXPORTS,
        }
    }

    /// Mode from `EXPORT_MODE`, retention from `EXPORT_KEEP`.
    pub fn from_env(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut out = Self::new(dir, ExportMode::from_env()?);
        if let Ok(s) = std::env::var("EXPORT_KEEP") {
            let keep = s
                .trim()
                .parse::<usize>()
                .with_context(|| format!("EXPORT_KEEP must be a positive integer (got {s:?})"))?;
            out = out.with_keep(keep);
        }
        Ok(out)
    }

    /// Values below 1 are raised to 1 so the export just written always survives.
    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name_for(id: Uuid) -> String {
        format!("{PER_REQUEST_PREFIX}{}.csv", id.as_hyphenated())
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(Self::file_name_for(id))
    }

    pub fn shared_path(&self) -> PathBuf {
        self.dir.join(SHARED_EXPORT_FILE)
    }

    /// Writes the rows through a temp file and renames it into place, so a
    /// concurrent download sees either the old or the new export, never a torn one.
    pub fn write_page(
        &self,
        columns: &CanonicalColumns,
        rows: &[EnrichedRow],
    ) -> Result<ExportHandle> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create export dir {}", self.dir.display()))?;

        let (id, file_name) = match self.mode {
            ExportMode::PerRequest => {
                let id = Uuid::new_v4();
                (Some(id), Self::file_name_for(id))
            }
            ExportMode::Shared => (None, SHARED_EXPORT_FILE.to_string()),
        };

        let final_path = self.dir.join(&file_name);
        let tmp_path = self
            .dir
            .join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        let write = || -> Result<()> {
            let file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            let mut buf = std::io::BufWriter::new(file);
            write_csv(&mut buf, columns, rows)?;
            buf.flush().context("failed to flush export")?;
            std::fs::rename(&tmp_path, &final_path).with_context(|| {
                format!("failed to move export into {}", final_path.display())
            })?;
            Ok(())
        };

        if let Err(err) = write() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }

        tracing::debug!(path = %final_path.display(), rows = rows.len(), "wrote page export");

        if self.mode == ExportMode::PerRequest {
            if let Err(err) = self.prune(&final_path) {
                tracing::warn!(error = %format!("{err:#}"), "pruning old exports failed");
            }
        }

        Ok(ExportHandle {
            id,
            file_name,
            rows: rows.len(),
        })
    }
}

impl PageExporter {
    /// Deletes the oldest per-request exports beyond `keep`, never touching `current`.
    fn prune(&self, current: &Path) -> Result<()> {
        let mut older = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry.context("failed to read export dir entry")?;
            let path = entry.path();
            if path == current {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(PER_REQUEST_PREFIX) || !name.ends_with(".csv") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            older.push((modified, path));
        }

        let budget = self.keep.saturating_sub(1);
        if older.len() <= budget {
            return Ok(());
        }

        older.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0usize;
        for (_, path) in older.into_iter().skip(budget) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("failed to remove {}", path.display())))
                }
            }
        }
        tracing::debug!(removed, keep = self.keep, "pruned old page exports");
        Ok(())
    }
}

/// Header plus one record per row, matching the displayed column order.
pub fn write_csv<W: Write>(
    writer: W,
    columns: &CanonicalColumns,
    rows: &[EnrichedRow],
) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(header_for(columns))
        .context("failed to write export header")?;
    for row in rows {
        let cells = row.cells(columns);
        w.write_record(cells.iter().map(|c| c.as_deref().unwrap_or("")))
            .context("failed to write export row")?;
    }
    w.flush().context("failed to flush export")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawSnapshot;
    use crate::pipeline::enrich::enrich_snapshot;
    use crate::pipeline::schema::{resolve_columns, AliasTable};

    fn table() -> (CanonicalColumns, Vec<EnrichedRow>) {
        let csv = "SYMBOL,OPEN_PRICE,CLOSE_PRICE,TTL_TRD_VAL\n\
                   TCS,100,103,5000000\n\
                   ZERO,0,10,\n";
        let snap = RawSnapshot::from_csv_reader(csv.as_bytes()).unwrap();
        let cols = resolve_columns(snap.columns(), &AliasTable::default());
        let t = enrich_snapshot(&snap, &cols);
        (t.columns, t.rows)
    }

    #[test]
    fn writes_header_and_rows_in_display_order() {
        let (cols, rows) = table();
        let mut out = Vec::new();
        write_csv(&mut out, &cols, &rows).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "SYMBOL,OPEN_PRICE,CLOSE_PRICE,TTL_TRD_VAL,PRICE_CATEGORY,PCT_CHANGE,TREND",
                "TCS,100,103,5000000,Mid,3,Strong Gainer",
                "ZERO,0,10,,Low,,",
            ]
        );
    }

    #[test]
    fn per_request_exports_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PageExporter::new(dir.path(), ExportMode::PerRequest);
        let (cols, rows) = table();

        let a = exporter.write_page(&cols, &rows).unwrap();
        let b = exporter.write_page(&cols, &rows[..1]).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.rows, 1);

        let a_text = std::fs::read_to_string(exporter.path_for(a.id.unwrap())).unwrap();
        assert_eq!(a_text.lines().count(), 3);
        let b_text = std::fs::read_to_string(exporter.path_for(b.id.unwrap())).unwrap();
        assert_eq!(b_text.lines().count(), 2);
    }

    #[test]
    fn shared_export_is_overwritten_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PageExporter::new(dir.path(), ExportMode::Shared);
        let (cols, rows) = table();

        exporter.write_page(&cols, &rows).unwrap();
        let handle = exporter.write_page(&cols, &rows[1..]).unwrap();
        assert_eq!(handle.id, None);
        assert_eq!(handle.file_name, SHARED_EXPORT_FILE);

        let text = std::fs::read_to_string(exporter.shared_path()).unwrap();
        assert!(text.contains("ZERO"));
        assert!(!text.contains("TCS"));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn per_request_exports_are_bounded_by_keep() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PageExporter::new(dir.path(), ExportMode::PerRequest).with_keep(5);
        let (cols, rows) = table();

        let mut last = None;
        for _ in 0..30 {
            last = Some(exporter.write_page(&cols, &rows).unwrap());
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 5);
        assert!(names.contains(&last.unwrap().file_name));
    }

    #[test]
    fn pruning_leaves_unrelated_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        std::fs::write(dir.path().join(SHARED_EXPORT_FILE), "a,b\n").unwrap();
        let exporter = PageExporter::new(dir.path(), ExportMode::PerRequest).with_keep(1);
        let (cols, rows) = table();

        exporter.write_page(&cols, &rows).unwrap();
        let handle = exporter.write_page(&cols, &rows).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join(SHARED_EXPORT_FILE).exists());
        assert!(exporter.path_for(handle.id.unwrap()).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn keep_is_at_least_one() {
        let exporter = PageExporter::new("/tmp", ExportMode::PerRequest).with_keep(0);
        assert_eq!(exporter.keep(), 1);
    }

    #[test]
    fn parses_export_mode() {
        assert_eq!("shared".parse::<ExportMode>().unwrap(), ExportMode::Shared);
        assert_eq!("per_request".parse::<ExportMode>().unwrap(), ExportMode::PerRequest);
        assert!("s3".parse::<ExportMode>().is_err());
    }
}
