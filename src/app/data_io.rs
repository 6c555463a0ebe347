use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::checkpoint::SnapshotStore;
use super::error::StoreError;
use super::types::{Field, Record};

pub const LISTINGS_FILE: &str = "gaf_roofing_contractors.csv";
pub const DETAILS_FILE: &str = "gaf_roofing_contractors_with_about.csv";
pub const ANALYSIS_FILE: &str = "gaf_roofing_contractors_with_analysis.csv";

/// CSV file holding the full record set. Saves replace the file atomically.
#[derive(Debug, Clone)]
pub struct RowStore {
    path: PathBuf,
}

impl RowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Record>, StoreError> {
        let read_err = |source: csv::Error| StoreError::Read {
            path: self.path.clone(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(&self.path)
            .map_err(read_err)?;

        let mut records = Vec::new();
        for row in reader.deserialize::<Record>() {
            let mut record = row.map_err(read_err)?;
            record.normalize();
            records.push(record);
        }
        info!(path = %self.path.display(), count = records.len(), "loaded records");
        Ok(records)
    }

    /// Writes a sibling temporary file, syncs it, then renames it over the
    /// target so readers only ever see complete snapshots.
    pub fn save(&self, records: &[Record]) -> Result<(), StoreError> {
        let partial = self.partial_path();
        let write_err = |source: csv::Error| StoreError::Write {
            path: partial.clone(),
            source,
        };
        let commit_err = |source: io::Error| StoreError::Commit {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(commit_err)?;
        }
        let file = File::create(&partial).map_err(commit_err)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(Field::ALL.iter().map(|f| f.column()))
            .map_err(write_err)?;
        for record in records {
            writer.serialize(record).map_err(write_err)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| commit_err(e.into_error()))?;
        file.sync_all().map_err(commit_err)?;
        drop(file);
        fs::rename(&partial, &self.path).map_err(commit_err)?;

        debug!(path = %self.path.display(), count = records.len(), "snapshot written");
        Ok(())
    }

    fn partial_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "records.csv".to_string());
        self.path.with_file_name(format!(".{name}.partial"))
    }
}

impl SnapshotStore for RowStore {
    fn save(&mut self, records: &[Record]) -> Result<(), StoreError> {
        RowStore::save(self, records)
    }
}

/// Where a stage reads from: its own output when a previous run left one
/// behind, the upstream file otherwise.
pub fn resume_source(input: &Path, output: &Path) -> PathBuf {
    if output.is_file() {
        info!(path = %output.display(), "resuming from existing output");
        output.to_path_buf()
    } else {
        input.to_path_buf()
    }
}
