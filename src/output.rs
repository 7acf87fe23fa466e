use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::table::Table;

/// Row type of a CSV artifact. `HEADERS` must list the serialized field
/// names in declaration order.
pub trait CsvRecord: Serialize {
    const HEADERS: &'static [&'static str];
}

/// Directory for one run's artifacts. Every file written through it shares
/// the run timestamp.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
    timestamp: String,
}

impl OutputDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::with_timestamp(root, timestamp)
    }

    pub fn with_timestamp(root: impl Into<PathBuf>, timestamp: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output directory {}", root.display()))?;
        Ok(Self {
            root,
            timestamp: timestamp.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn subdir(&self, name: &str) -> Result<Self> {
        Self::with_timestamp(self.root.join(name), self.timestamp.clone())
    }

    /// `<prefix>_<timestamp>.<extension>` inside this directory.
    pub fn stamped(&self, prefix: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("{prefix}_{}.{extension}", self.timestamp))
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, prefix: &str, value: &T) -> Result<PathBuf> {
        let path = self.stamped(prefix, "json");
        let body = serde_json::to_string_pretty(value).context("failed to serialize output")?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote json");
        Ok(path)
    }

    /// Writes one row per record. An empty slice still produces the header
    /// line so downstream readers can tell the columns apart from a bad file.
    pub fn write_csv<T: CsvRecord>(&self, prefix: &str, rows: &[T]) -> Result<PathBuf> {
        let path = self.stamped(prefix, "csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        if rows.is_empty() {
            writer.write_record(T::HEADERS)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = rows.len(), "wrote csv");
        Ok(path)
    }

    pub fn write_table(&self, prefix: &str, table: &Table) -> Result<PathBuf> {
        let path = self.stamped(prefix, "csv");
        table
            .write_csv_path(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), rows = table.rows.len(), "wrote csv");
        Ok(path)
    }

    /// One value per line, for plain org id lists.
    pub fn write_lines<S: AsRef<str>>(&self, prefix: &str, lines: &[S]) -> Result<PathBuf> {
        let path = self.stamped(prefix, "txt");
        let mut body = String::new();
        for line in lines {
            body.push_str(line.as_ref());
            body.push('\n');
        }
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
