//! Fixture writer producing complete blocks from label sets.
//!
//! Blocks written here carry series and postings only; no chunk data is
//! written and every series declares zero chunks. That is all the query
//! path reads, so tests and benches get real on-disk blocks without a full
//! storage engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use ulid::Ulid;

use crate::block::{BlockMeta, BlockStats, CHUNKS_DIR, INDEX_FILE, META_FILE, META_VERSION};
use crate::encoding::Encbuf;
use crate::error::BlockError;
use crate::index::{ALL_POSTINGS_KEY, FORMAT_V2, MAGIC_INDEX, SERIES_ALIGNMENT};
use crate::labels::Labels;

/// Encodes a version-2 index for a set of series.
#[derive(Debug, Clone)]
pub struct IndexWriter {
    /// Sorted, deduplicated, non-empty label sets.
    series: Vec<Labels>,
}

impl IndexWriter {
    /// Creates a writer for `series`.
    ///
    /// Label sets are sorted and deduplicated; empty label sets are dropped.
    pub fn new(mut series: Vec<Labels>) -> Self {
        series.retain(|s| !s.is_empty());
        series.sort();
        series.dedup();
        Self { series }
    }

    /// Number of series the index will contain.
    pub fn num_series(&self) -> usize {
        self.series.len()
    }

    /// Encodes the complete index file.
    #[allow(clippy::cast_possible_truncation)] // fixture indexes stay far below 4 GiB
    pub fn encode(&self) -> Vec<u8> {
        let symbols: BTreeSet<&str> = self
            .series
            .iter()
            .flat_map(|s| s.iter())
            .flat_map(|l| [l.name.as_str(), l.value.as_str()])
            .collect();
        let symbol_refs: HashMap<&str, u32> = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as u32))
            .collect();

        let mut buf = Encbuf::new();
        buf.put_be32(MAGIC_INDEX);
        buf.put_byte(FORMAT_V2);

        // Symbol table.
        let toc_symbols = buf.len();
        let mut contents = Encbuf::new();
        contents.put_be32(symbols.len() as u32);
        for s in &symbols {
            contents.put_uvarint_str(s);
        }
        buf.put_section(contents.as_slice());

        // Series, collecting postings and label values on the way.
        buf.pad_to(SERIES_ALIGNMENT);
        let toc_series = buf.len();
        let mut all_refs = Vec::with_capacity(self.series.len());
        let mut postings: BTreeMap<(&str, &str), Vec<u32>> = BTreeMap::new();
        let mut label_values: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for series in &self.series {
            buf.pad_to(SERIES_ALIGNMENT);
            let series_ref = (buf.len() / SERIES_ALIGNMENT) as u32;
            all_refs.push(series_ref);

            let mut contents = Encbuf::new();
            contents.put_uvarint(series.len() as u64);
            for l in series.iter() {
                contents.put_uvarint(u64::from(symbol_refs[l.name.as_str()]));
                contents.put_uvarint(u64::from(symbol_refs[l.value.as_str()]));
                postings
                    .entry((l.name.as_str(), l.value.as_str()))
                    .or_default()
                    .push(series_ref);
                label_values
                    .entry(l.name.as_str())
                    .or_default()
                    .insert(l.value.as_str());
            }
            // No chunks.
            contents.put_uvarint(0);
            buf.put_uvarint_section(contents.as_slice());
        }

        // Label indices, one per label name.
        buf.pad_to(4);
        let toc_label_indices = buf.len();
        let mut label_index_offsets = Vec::with_capacity(label_values.len());
        for (name, values) in &label_values {
            buf.pad_to(4);
            label_index_offsets.push((*name, buf.len()));
            let mut contents = Encbuf::new();
            contents.put_be32(1);
            contents.put_be32(values.len() as u32);
            for v in values {
                contents.put_be32(symbol_refs[v]);
            }
            buf.put_section(contents.as_slice());
        }

        // Postings lists, the all-postings list first.
        buf.pad_to(4);
        let toc_postings = buf.len();
        let mut postings_offsets = Vec::with_capacity(postings.len() + 1);
        let lists = std::iter::once((ALL_POSTINGS_KEY, &all_refs))
            .chain(postings.iter().map(|(key, refs)| (*key, refs)));
        for (key, refs) in lists {
            buf.pad_to(4);
            postings_offsets.push((key, buf.len()));
            let mut contents = Encbuf::new();
            contents.put_be32(refs.len() as u32);
            for r in refs {
                contents.put_be32(*r);
            }
            buf.put_section(contents.as_slice());
        }

        // Label offset table.
        let toc_label_indices_table = buf.len();
        let mut contents = Encbuf::new();
        contents.put_be32(label_index_offsets.len() as u32);
        for (name, offset) in &label_index_offsets {
            contents.put_uvarint(1);
            contents.put_uvarint_str(name);
            contents.put_uvarint(*offset as u64);
        }
        buf.put_section(contents.as_slice());

        // Postings offset table.
        let toc_postings_table = buf.len();
        let mut contents = Encbuf::new();
        contents.put_be32(postings_offsets.len() as u32);
        for ((name, value), offset) in &postings_offsets {
            contents.put_uvarint(2);
            contents.put_uvarint_str(name);
            contents.put_uvarint_str(value);
            contents.put_uvarint(*offset as u64);
        }
        buf.put_section(contents.as_slice());

        // Table of contents.
        let mut toc = Encbuf::new();
        for offset in [
            toc_symbols,
            toc_series,
            toc_label_indices,
            toc_label_indices_table,
            toc_postings,
            toc_postings_table,
        ] {
            toc.put_be64(offset as u64);
        }
        buf.put_bytes(toc.as_slice());
        buf.put_crc32(toc.as_slice());

        buf.into_inner()
    }

    /// Encodes the index and writes it to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BlockError::Write`] if the file cannot be written.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), BlockError> {
        let path = path.as_ref();
        fs::write(path, self.encode()).map_err(|source| BlockError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Writes complete block directories.
///
/// # Examples
///
/// ```rust,no_run
/// use postbench::labels::Labels;
/// use postbench::writer::BlockWriter;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let series = vec![
///     Labels::from_pairs([("pod", "abc-1"), ("job", "api")]),
///     Labels::from_pairs([("pod", "xyz-1"), ("job", "db")]),
/// ];
/// let block_dir = BlockWriter::new(series).write("./data")?;
/// println!("wrote {}", block_dir.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BlockWriter {
    index: IndexWriter,
    min_time: i64,
    max_time: i64,
}

impl BlockWriter {
    /// Creates a writer for `series` covering an empty time range.
    pub fn new(series: Vec<Labels>) -> Self {
        Self {
            index: IndexWriter::new(series),
            min_time: 0,
            max_time: 0,
        }
    }

    /// Sets the block's time range in milliseconds.
    #[must_use]
    pub fn time_range(mut self, min_time: i64, max_time: i64) -> Self {
        self.min_time = min_time;
        self.max_time = max_time;
        self
    }

    /// Writes a new block under `parent` and returns its directory.
    ///
    /// The directory is named after a freshly generated block id.
    ///
    /// # Errors
    ///
    /// Returns a [`BlockError`] if any file or directory cannot be written.
    pub fn write<P: AsRef<Path>>(&self, parent: P) -> Result<PathBuf, BlockError> {
        let ulid = new_block_id();
        let dir = parent.as_ref().join(&ulid);
        self.write_dir(&dir, ulid)?;
        Ok(dir)
    }

    /// Writes the block into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns a [`BlockError`] if any file or directory cannot be written.
    pub fn write_into<P: AsRef<Path>>(&self, dir: P) -> Result<(), BlockError> {
        self.write_dir(dir.as_ref(), new_block_id())
    }

    fn write_dir(&self, dir: &Path, ulid: String) -> Result<(), BlockError> {
        let chunks = dir.join(CHUNKS_DIR);
        fs::create_dir_all(&chunks).map_err(|source| BlockError::Write {
            path: chunks.clone(),
            source,
        })?;

        self.index.write_to(dir.join(INDEX_FILE))?;

        let meta = BlockMeta {
            ulid,
            min_time: self.min_time,
            max_time: self.max_time,
            stats: BlockStats {
                num_series: self.index.num_series() as u64,
                ..BlockStats::default()
            },
            version: META_VERSION,
            ..BlockMeta::default()
        };
        let json = serde_json::to_vec_pretty(&meta).map_err(BlockError::MetaSerialize)?;
        let meta_path = dir.join(META_FILE);
        fs::write(&meta_path, json).map_err(|source| BlockError::Write {
            path: meta_path,
            source,
        })?;

        tracing::debug!(
            dir = %dir.display(),
            num_series = meta.stats.num_series,
            "wrote block"
        );
        Ok(())
    }
}

/// Generates a block id: a ULID in its 26-character Crockford base32 form.
fn new_block_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use tempfile::tempdir;

    #[test]
    fn test_index_writer_sorts_and_dedups() {
        let a = Labels::from_pairs([("pod", "a")]);
        let b = Labels::from_pairs([("pod", "b")]);
        let writer = IndexWriter::new(vec![b.clone(), a.clone(), b, Labels::default()]);
        assert_eq!(writer.num_series(), 2);
        assert_eq!(writer.series, vec![a, Labels::from_pairs([("pod", "b")])]);
    }

    #[test]
    fn test_encoded_header_and_alignment() {
        let bytes = IndexWriter::new(vec![Labels::from_pairs([("pod", "a")])]).encode();
        assert_eq!(&bytes[..4], &MAGIC_INDEX.to_be_bytes());
        assert_eq!(bytes[4], FORMAT_V2);

        let toc = &bytes[bytes.len() - 52..];
        let series_offset = u64::from_be_bytes(toc[8..16].try_into().unwrap());
        assert_eq!(series_offset % SERIES_ALIGNMENT as u64, 0);
    }

    #[test]
    fn test_block_writer_layout() {
        let dir = tempdir().unwrap();
        let series = vec![
            Labels::from_pairs([("pod", "abc-1")]),
            Labels::from_pairs([("pod", "abc-2")]),
        ];
        let block_dir = BlockWriter::new(series)
            .time_range(1_000, 7_201_000)
            .write(dir.path())
            .unwrap();

        assert!(block_dir.join(CHUNKS_DIR).is_dir());
        assert!(block_dir.join(INDEX_FILE).is_file());

        let block = Block::open(&block_dir).unwrap();
        assert_eq!(block.meta().stats.num_series, 2);
        assert_eq!(block.meta().min_time, 1_000);
        assert_eq!(
            block_dir.file_name().unwrap().to_str().unwrap(),
            block.meta().ulid
        );
    }

    #[test]
    fn test_block_ids_are_unique_and_well_formed() {
        let a = new_block_id();
        let b = new_block_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
        assert!(a.bytes().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(Ulid::from_string(&a).unwrap().to_string(), a);
    }
}
