//! Persisted block directories.
//!
//! # File Layout
//!
//! ```text
//! <block>/
//! ├── meta.json      <- Block metadata (id, time range, stats, version)
//! ├── index          <- Symbols, series and postings (see crate::index)
//! └── chunks/        <- Sample data, never read here
//! ```
//!
//! Opening a block validates the directory and parses `meta.json`; the index
//! is only mapped when [`Block::index`] is called.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlockError, IndexError};
use crate::index::BlockIndex;

/// Name of the metadata file in a block directory.
pub const META_FILE: &str = "meta.json";

/// Name of the index file in a block directory.
pub const INDEX_FILE: &str = "index";

/// Name of the chunks directory in a block directory.
pub const CHUNKS_DIR: &str = "chunks";

/// The only supported `meta.json` version.
pub const META_VERSION: u32 = 1;

/// Contents of a block's `meta.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    /// Unique block id.
    pub ulid: String,
    /// Inclusive start of the block's time range, in milliseconds.
    #[serde(default)]
    pub min_time: i64,
    /// Exclusive end of the block's time range, in milliseconds.
    #[serde(default)]
    pub max_time: i64,
    /// Counts of the block's contents.
    #[serde(default)]
    pub stats: BlockStats,
    /// Compaction history.
    #[serde(default)]
    pub compaction: Compaction,
    /// Metadata format version.
    pub version: u32,
}

/// Content counts recorded in `meta.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockStats {
    /// Number of samples.
    pub num_samples: u64,
    /// Number of series.
    pub num_series: u64,
    /// Number of chunks.
    pub num_chunks: u64,
    /// Number of tombstones.
    pub num_tombstones: u64,
}

/// Compaction history recorded in `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Compaction {
    /// Compaction level; freshly cut blocks are level 1.
    pub level: u32,
    /// Ids of the blocks this block was compacted from.
    pub sources: Vec<String>,
    /// Set when the block was superseded by a compaction.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deletable: bool,
    /// Set when compacting this block failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl Default for Compaction {
    fn default() -> Self {
        Self {
            level: 1,
            sources: Vec::new(),
            deletable: false,
            failed: false,
        }
    }
}

/// Handle to an opened block directory.
///
/// # Examples
///
/// ```rust,no_run
/// use postbench::block::Block;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let block = Block::open("./data/01HBLOCK")?;
/// println!("{} series", block.meta().stats.num_series);
/// let index = block.index()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Block {
    dir: PathBuf,
    meta: BlockMeta,
}

impl Block {
    /// Opens the block at `dir`.
    ///
    /// # Errors
    ///
    /// - [`BlockError::DirectoryAccess`] if `dir` does not exist or cannot be read
    /// - [`BlockError::NotADirectory`] if `dir` is a file
    /// - [`BlockError::MetaRead`] or [`BlockError::MetaParse`] if `meta.json`
    ///   is missing or malformed
    /// - [`BlockError::UnsupportedMetaVersion`] if the version is not 1
    /// - [`BlockError::MissingIndex`] if there is no index file
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, BlockError> {
        let dir = dir.as_ref().to_path_buf();

        let attr = fs::metadata(&dir).map_err(|source| BlockError::DirectoryAccess {
            path: dir.clone(),
            source,
        })?;
        if !attr.is_dir() {
            return Err(BlockError::NotADirectory { path: dir });
        }

        let meta_path = dir.join(META_FILE);
        let raw = fs::read(&meta_path).map_err(|source| BlockError::MetaRead {
            path: meta_path.clone(),
            source,
        })?;
        let meta: BlockMeta =
            serde_json::from_slice(&raw).map_err(|source| BlockError::MetaParse {
                path: meta_path,
                source,
            })?;
        if meta.version != META_VERSION {
            return Err(BlockError::UnsupportedMetaVersion {
                version: meta.version,
            });
        }

        let index_path = dir.join(INDEX_FILE);
        fs::metadata(&index_path).map_err(|source| BlockError::MissingIndex {
            path: index_path,
            source,
        })?;

        tracing::debug!(
            dir = %dir.display(),
            ulid = %meta.ulid,
            num_series = meta.stats.num_series,
            "opened block"
        );

        Ok(Self { dir, meta })
    }

    /// The block's parsed metadata.
    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// The block directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Maps and validates the block's index.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the index cannot be opened or is corrupted.
    pub fn index(&self) -> Result<BlockIndex, IndexError> {
        BlockIndex::open(self.dir.join(INDEX_FILE))
    }
}
