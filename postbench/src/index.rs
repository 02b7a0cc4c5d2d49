//! Read-only, memory-mapped reader for a block's index file.
//!
//! # File Format (version 2)
//!
//! ```text
//! [0..4)     magic 0xBAAAD700
//! [4..5)     format version (2)
//! [5..)      symbol table
//!            series (16-byte aligned; series ref = offset / 16)
//!            label indices
//!            postings lists
//!            label offset table
//!            postings offset table
//! [len-52..) table of contents: six u64 section offsets + CRC32
//! ```
//!
//! Every section is length-prefixed and followed by a CRC32 (Castagnoli) of
//! its contents; see [`crate::encoding`]. Symbols are referenced by their
//! position in the symbol table.
//!
//! Opening an index validates the header and table of contents and decodes
//! the symbol table and the postings offset table. Postings lists themselves
//! are checksum-verified and decoded lazily, per query.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::encoding::{Decbuf, section_at, uvarint_section_at};
use crate::error::IndexError;
use crate::labels::Labels;
use crate::postings::{BigEndianPostings, BoxPostings, EmptyPostings, SeriesRef, merge};

/// Magic number identifying an index file.
pub const MAGIC_INDEX: u32 = 0xBAAA_D700;

/// Legacy index format; series refs are raw offsets. Not supported.
pub const FORMAT_V1: u8 = 1;

/// Current index format.
pub const FORMAT_V2: u8 = 2;

/// Size of magic plus version byte.
pub(crate) const HEADER_LEN: usize = 5;

/// Size of the table of contents at the end of the file.
pub(crate) const TOC_LEN: usize = 6 * 8 + 4;

/// Series entries are aligned to this many bytes; a series ref is its
/// offset divided by the alignment.
pub(crate) const SERIES_ALIGNMENT: usize = 16;

/// Label name and value under which the list of every series is stored.
pub const ALL_POSTINGS_KEY: (&str, &str) = ("", "");

/// Query surface of an index, consumed by [`crate::querier`] and the
/// benchmark harness.
pub trait IndexReader {
    /// Returns the sorted values of label `name`.
    ///
    /// An unknown label yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the index cannot be read.
    fn label_values(&self, name: &str) -> Result<Vec<String>, IndexError>;

    /// Returns the union of the postings of `name=v` for each `v` in
    /// `values`. Values that are not present contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if a postings list is corrupted.
    fn postings(&self, name: &str, values: &[String]) -> Result<BoxPostings<'_>, IndexError>;
}

/// Section offsets read from the table of contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Toc {
    symbols: usize,
    series: usize,
    label_indices: usize,
    label_indices_table: usize,
    postings: usize,
    postings_table: usize,
}

impl Toc {
    fn read(data: &[u8]) -> Result<Self, IndexError> {
        let start = data.len() - TOC_LEN;
        let raw = &data[start..];
        let expected = u32::from_be_bytes([raw[48], raw[49], raw[50], raw[51]]);
        let computed = crc32c::crc32c(&raw[..48]);
        if expected != computed {
            return Err(IndexError::ChecksumMismatch {
                section: "toc",
                offset: start,
                expected,
                computed,
            });
        }

        let mut d = Decbuf::new(&raw[..48], start, "toc");
        let mut next = || -> Result<usize, IndexError> {
            let off = d.be64()?;
            usize::try_from(off)
                .ok()
                .filter(|&pos| pos < start)
                .ok_or_else(|| IndexError::Corrupted {
                    section: "toc",
                    reason: format!("section offset {off} beyond end of index ({start})"),
                })
        };

        let toc = Self {
            symbols: next()?,
            series: next()?,
            label_indices: next()?,
            label_indices_table: next()?,
            postings: next()?,
            postings_table: next()?,
        };

        // Sections are laid out in this order.
        let layout = [
            toc.symbols,
            toc.series,
            toc.label_indices,
            toc.postings,
            toc.label_indices_table,
            toc.postings_table,
        ];
        if layout.windows(2).any(|w| w[0] > w[1]) {
            return Err(IndexError::Corrupted {
                section: "toc",
                reason: format!("section offsets out of order: {layout:?}"),
            });
        }
        Ok(toc)
    }
}

/// Memory-mapped index of a single block.
///
/// The reader is immutable once opened; every query method takes `&self`.
pub struct BlockIndex {
    /// Path of the index file (for error reporting).
    path: PathBuf,
    /// Read-only mapping of the whole file.
    mmap: Mmap,
    toc: Toc,
    /// Symbol table; a symbol ref is the position in this vector.
    symbols: Vec<String>,
    /// Postings list offsets by label name, then by value (values sorted).
    postings_table: BTreeMap<String, Vec<(String, usize)>>,
}

impl BlockIndex {
    /// Opens and validates the index file at `path`.
    ///
    /// # Errors
    ///
    /// - [`IndexError::Open`] if the file cannot be opened or mapped
    /// - [`IndexError::TooSmall`], [`IndexError::InvalidMagic`] or
    ///   [`IndexError::UnsupportedVersion`] for a malformed header
    /// - [`IndexError::ChecksumMismatch`] or [`IndexError::Corrupted`] if the
    ///   table of contents, symbol table or postings offset table is damaged
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use postbench::index::BlockIndex;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let index = BlockIndex::open("./data/01HBLOCK/index")?;
    /// println!("{} label names", index.label_names().len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|source| IndexError::Open {
            path: path.clone(),
            source,
        })?;

        // SAFETY: The mapping is read-only and blocks are immutable once
        // written; nothing in this process writes to the file while mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| IndexError::Open {
            path: path.clone(),
            source,
        })?;

        let data: &[u8] = &mmap;
        if data.len() < HEADER_LEN + TOC_LEN {
            return Err(IndexError::TooSmall {
                size: data.len(),
                min: HEADER_LEN + TOC_LEN,
            });
        }

        let mut header = Decbuf::new(&data[..HEADER_LEN], 0, "header");
        let magic = header.be32()?;
        if magic != MAGIC_INDEX {
            return Err(IndexError::InvalidMagic { found: magic });
        }
        let version = header.byte()?;
        if version != FORMAT_V2 {
            return Err(IndexError::UnsupportedVersion { version });
        }

        let toc = Toc::read(data)?;
        let symbols = read_symbols(data, toc.symbols)?;
        let postings_table = read_postings_table(data, toc.postings_table)?;

        tracing::debug!(
            path = %path.display(),
            size = data.len(),
            symbols = symbols.len(),
            label_names = postings_table.len().saturating_sub(1),
            "opened block index"
        );

        Ok(Self {
            path,
            mmap,
            toc,
            symbols,
            postings_table,
        })
    }

    /// Path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the index file in bytes.
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Iterates the symbol table in order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    /// Resolves a symbol reference.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnknownSymbol`] if `reference` is out of range.
    pub fn symbol(&self, reference: u32) -> Result<&str, IndexError> {
        self.symbols
            .get(reference as usize)
            .map(String::as_str)
            .ok_or(IndexError::UnknownSymbol { reference })
    }

    /// Returns all label names present in the block, sorted.
    pub fn label_names(&self) -> Vec<&str> {
        self.postings_table
            .keys()
            .map(String::as_str)
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Returns postings for every series in the block.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the list is corrupted.
    pub fn all_postings(&self) -> Result<BoxPostings<'_>, IndexError> {
        let (name, value) = ALL_POSTINGS_KEY;
        self.postings(name, &[value.to_string()])
    }

    /// Decodes the labels of series `reference`.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the reference does not point at a valid
    /// series entry.
    pub fn series(&self, reference: SeriesRef) -> Result<Labels, IndexError> {
        let offset = usize::try_from(reference)
            .ok()
            .and_then(|r| r.checked_mul(SERIES_ALIGNMENT))
            .filter(|&off| off >= self.toc.series && off < self.toc.label_indices)
            .ok_or_else(|| IndexError::Corrupted {
                section: "series",
                reason: format!("series reference {reference} outside the series section"),
            })?;

        let mut d = uvarint_section_at(&self.mmap, offset, "series")?;
        let count = d.uvarint()?;
        let mut pairs = Vec::new();
        for _ in 0..count {
            let name = self.symbol(d.uvarint32()?)?;
            let value = self.symbol(d.uvarint32()?)?;
            pairs.push((name, value));
        }
        Ok(Labels::from_pairs(pairs))
    }

    /// Reads the postings list whose section starts at `offset`.
    fn postings_at(&self, offset: usize) -> Result<BigEndianPostings<'_>, IndexError> {
        let mut d = section_at(&self.mmap, offset, "postings")?;
        let count = d.be32()? as usize;
        let refs = d.rest();
        if refs.len() != count * 4 {
            return Err(IndexError::Corrupted {
                section: "postings",
                reason: format!(
                    "list at offset {offset} declares {count} entries but holds {} bytes",
                    refs.len()
                ),
            });
        }
        Ok(BigEndianPostings::new(refs))
    }
}

impl IndexReader for BlockIndex {
    fn label_values(&self, name: &str) -> Result<Vec<String>, IndexError> {
        if name.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .postings_table
            .get(name)
            .map(|values| values.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default())
    }

    fn postings(&self, name: &str, values: &[String]) -> Result<BoxPostings<'_>, IndexError> {
        let Some(entries) = self.postings_table.get(name) else {
            return Ok(EmptyPostings::boxed());
        };

        let mut its: Vec<BoxPostings<'_>> = Vec::with_capacity(values.len());
        for value in values {
            if let Ok(i) = entries.binary_search_by(|(v, _)| v.as_str().cmp(value)) {
                its.push(Box::new(self.postings_at(entries[i].1)?));
            }
        }
        Ok(merge(its))
    }
}

impl std::fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockIndex")
            .field("path", &self.path)
            .field("size", &self.mmap.len())
            .field("symbols", &self.symbols.len())
            .field("label_names", &self.postings_table.len())
            .finish_non_exhaustive()
    }
}

fn read_symbols(data: &[u8], offset: usize) -> Result<Vec<String>, IndexError> {
    let mut d = section_at(data, offset, "symbols")?;
    let count = d.be32()? as usize;
    // Cap the pre-allocation: a corrupted count must not trigger a huge alloc.
    let mut symbols = Vec::with_capacity(count.min(d.remaining()));
    for _ in 0..count {
        symbols.push(d.uvarint_str()?.to_string());
    }
    Ok(symbols)
}

fn read_postings_table(
    data: &[u8],
    offset: usize,
) -> Result<BTreeMap<String, Vec<(String, usize)>>, IndexError> {
    let mut d = section_at(data, offset, "postings offset table")?;
    let count = d.be32()?;
    let mut table: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();

    for _ in 0..count {
        let key_len = d.uvarint()?;
        if key_len != 2 {
            return Err(IndexError::Corrupted {
                section: "postings offset table",
                reason: format!("unexpected key length {key_len}"),
            });
        }
        let name = d.uvarint_str()?;
        let value = d.uvarint_str()?;
        let list_offset = d.uvarint()?;
        let list_offset = usize::try_from(list_offset)
            .ok()
            .filter(|&off| off < data.len())
            .ok_or_else(|| IndexError::Corrupted {
                section: "postings offset table",
                reason: format!("postings offset {list_offset} beyond end of index"),
            })?;

        table
            .entry(name.to_string())
            .or_default()
            .push((value.to_string(), list_offset));
    }

    for values in table.values_mut() {
        values.sort_by(|a, b| a.0.cmp(&b.0));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::expand;
    use crate::writer::IndexWriter;
    use tempfile::tempdir;

    fn fixture() -> Vec<Labels> {
        vec![
            Labels::from_pairs([("pod", "abc-1"), ("job", "api")]),
            Labels::from_pairs([("pod", "abc-2"), ("job", "api")]),
            Labels::from_pairs([("pod", "xyz-1"), ("job", "db")]),
            Labels::from_pairs([("job", "db")]),
        ]
    }

    fn write_index(series: &[Labels]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");
        IndexWriter::new(series.to_vec()).write_to(&path).unwrap();
        (dir, path)
    }

    #[test]
    fn test_open_and_label_values() {
        let (_dir, path) = write_index(&fixture());
        let index = BlockIndex::open(&path).unwrap();

        assert_eq!(index.label_names(), vec!["job", "pod"]);
        assert_eq!(index.label_values("job").unwrap(), vec!["api", "db"]);
        assert_eq!(
            index.label_values("pod").unwrap(),
            vec!["abc-1", "abc-2", "xyz-1"]
        );
        assert!(index.label_values("missing").unwrap().is_empty());

        let symbols: Vec<_> = index.symbols().collect();
        assert!(symbols.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_postings_and_series_roundtrip() {
        let (_dir, path) = write_index(&fixture());
        let index = BlockIndex::open(&path).unwrap();

        let all = expand(index.all_postings().unwrap()).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0] < w[1]));

        let db = expand(index.postings("job", &["db".to_string()]).unwrap()).unwrap();
        assert_eq!(db.len(), 2);
        for r in db {
            assert_eq!(index.series(r).unwrap().get("job"), Some("db"));
        }

        let pods = ["abc-1".to_string(), "abc-2".to_string(), "nope".to_string()];
        let abc = expand(index.postings("pod", &pods).unwrap()).unwrap();
        assert_eq!(abc.len(), 2);

        let none = expand(index.postings("missing", &["x".to_string()]).unwrap()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_series_ref_out_of_range() {
        let (_dir, path) = write_index(&fixture());
        let index = BlockIndex::open(&path).unwrap();
        assert!(index.series(0).is_err());
        assert!(index.series(u64::MAX).is_err());
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let (_dir, path) = write_index(&fixture());
        let mut bytes = std::fs::read(&path).unwrap();

        bytes[4] = FORMAT_V1;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            BlockIndex::open(&path),
            Err(IndexError::UnsupportedVersion { version: 1 })
        ));

        bytes[0] = 0;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            BlockIndex::open(&path),
            Err(IndexError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_rejects_corrupted_toc() {
        let (_dir, path) = write_index(&fixture());
        let mut bytes = std::fs::read(&path).unwrap();
        let toc_start = bytes.len() - TOC_LEN;
        bytes[toc_start + 3] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            BlockIndex::open(&path),
            Err(IndexError::ChecksumMismatch { section: "toc", .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index");
        std::fs::write(&path, [0xBA, 0xAA, 0xD7, 0x00, 2]).unwrap();
        assert!(matches!(
            BlockIndex::open(&path),
            Err(IndexError::TooSmall { size: 5, .. })
        ));

        assert!(matches!(
            BlockIndex::open(dir.path().join("missing")),
            Err(IndexError::Open { .. })
        ));
    }

    #[test]
    fn test_corrupted_postings_list_fails_query() {
        let (_dir, path) = write_index(&fixture());
        let index = BlockIndex::open(&path).unwrap();
        let entries = index.postings_table.get("job").unwrap();
        let offset = entries[0].1;
        drop(index);

        let mut bytes = std::fs::read(&path).unwrap();
        // Corrupt the first series ref of the job="api" list.
        bytes[offset + 8] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let index = BlockIndex::open(&path).unwrap();
        assert!(matches!(
            index.postings("job", &["api".to_string()]),
            Err(IndexError::ChecksumMismatch { section: "postings", .. })
        ));
    }
}
