//! Partitioned on-disk datasets
//!
//! A dataset is a directory of `chunk_idx=<k>` subdirectories, each holding
//! columnar files for one chunk of conditions. A `Dataset` handle is lazy:
//! opening one touches nothing; partition keys come from the directory
//! listing and chunks are read one at a time.

pub mod parquet;

use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};
use crate::table::Table;

/// Name of a partition subdirectory for chunk `k`.
fn partition_dir(k: u32) -> String {
    format!("chunk_idx={k}")
}

/// Lazy handle to one partitioned dataset directory.
#[derive(Debug, Clone)]
pub struct Dataset {
    root: PathBuf,
}

impl Dataset {
    pub fn new(root: impl Into<PathBuf>) -> Dataset {
        Dataset { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Chunk keys present on disk, ascending.
    pub fn chunk_keys(&self) -> Result<Vec<u32>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(k) = name.strip_prefix("chunk_idx=") {
                if let Ok(k) = k.parse::<u32>() {
                    keys.push(k);
                }
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }

    /// Read every columnar file in one partition, row-concatenated.
    pub fn read_chunk(&self, k: u32) -> Result<Table> {
        let dir = self.root.join(partition_dir(k));
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "parquet"))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(SimError::Io(format!(
                "partition {} holds no parquet files",
                dir.display()
            )));
        }
        let pieces: Vec<Table> = files
            .iter()
            .map(|p| parquet::read_table(p))
            .collect::<Result<_>>()?;
        Ok(Table::concat(&pieces))
    }

    /// All chunks concatenated in key order. Convenience for consumers
    /// that want the full table without the map-by-condition machinery.
    pub fn read_all(&self) -> Result<Table> {
        let keys = self.chunk_keys()?;
        if keys.is_empty() {
            return Err(SimError::EmptyResults(format!(
                "dataset {} has no partitions",
                self.root.display()
            )));
        }
        let pieces: Vec<Table> = keys
            .iter()
            .map(|&k| self.read_chunk(k))
            .collect::<Result<_>>()?;
        Ok(Table::concat(&pieces))
    }

    /// Write one chunk's table as `chunk_idx=<k>/part-0.parquet`.
    ///
    /// Each chunk is a distinct partition subdirectory, so parallel workers
    /// never write the same path and no locking is needed.
    pub fn write_chunk(&self, k: u32, table: &Table) -> Result<()> {
        let dir = self.root.join(partition_dir(k));
        std::fs::create_dir_all(&dir)?;
        parquet::write_table(table, &dir.join("part-0.parquet"))
    }
}
