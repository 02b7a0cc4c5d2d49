//! Error types for the postbench query harness and the block index it reads.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for a benchmark run.
///
/// Each variant corresponds to one stage of the run. Every error is fatal to
/// the run: nothing is retried and no partial result is reported.
#[derive(Error, Debug)]
pub enum Error {
    /// The benchmark configuration is missing or invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The block directory could not be opened.
    #[error("could not open block: {0}")]
    BlockOpen(#[from] BlockError),

    /// The block index could not be opened.
    #[error("could not open block index: {0}")]
    IndexOpen(#[source] IndexError),

    /// The label matcher could not be built.
    #[error("could not create matcher: {0}")]
    MatcherBuild(#[from] MatcherError),

    /// A postings query failed.
    #[error("could not get postings: {0}")]
    Query(#[source] IndexError),

    /// Iterating the final postings list failed.
    #[error("iterate postings error after {drained} series: {source}")]
    Iteration {
        /// Number of series references consumed before the failure.
        drained: u64,
        /// The underlying index error.
        #[source]
        source: IndexError,
    },
}

impl Error {
    /// Returns the name of the stage that produced this error.
    ///
    /// Used as a structured logging field so a failed run can be traced back
    /// to the stage that stopped it.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::BlockOpen(_) => "block_open",
            Self::IndexOpen(_) => "index_open",
            Self::MatcherBuild(_) => "matcher_build",
            Self::Query(_) => "query",
            Self::Iteration { .. } => "iteration",
        }
    }
}

/// Errors in the benchmark configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No block directory was given.
    #[error("block directory must not be empty")]
    MissingBlockDir,

    /// The matcher field name is empty.
    #[error("matcher field must not be empty")]
    EmptyField,

    /// The repetition count is zero.
    #[error("invalid repetitions: {count} (must be > 0)")]
    InvalidRepetitions {
        /// The rejected count.
        count: u32,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for a config record.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The matcher type string is not one of `=`, `!=`, `=~`, `!~`.
    #[error("unknown matcher type '{0}' (expected one of =, !=, =~, !~)")]
    UnknownMatchType(String),
}

/// Errors that can occur when opening a block directory.
#[derive(Error, Debug)]
pub enum BlockError {
    /// The block directory does not exist or cannot be accessed.
    #[error("failed to access block directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The path exists but is not a directory.
    #[error("'{}' is not a directory", path.display())]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// meta.json could not be read.
    #[error("failed to read block meta '{}': {source}", path.display())]
    MetaRead {
        /// The meta file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// meta.json is not valid block metadata.
    #[error("corrupted block meta '{}': {source}", path.display())]
    MetaParse {
        /// The meta file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// meta.json declares a version this reader does not understand.
    #[error("unexpected meta file version {version}")]
    UnsupportedMetaVersion {
        /// The version found in meta.json.
        version: u32,
    },

    /// The block has no index file.
    #[error("block index file '{}' is missing: {source}", path.display())]
    MissingIndex {
        /// The expected index path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// meta.json could not be serialized when writing a block.
    #[error("failed to serialize block meta: {0}")]
    MetaSerialize(#[source] serde_json::Error),

    /// Writing a block file failed.
    #[error("failed to write block file '{}': {source}", path.display())]
    Write {
        /// The file being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while reading an index file or iterating its postings.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The index file could not be opened or mapped.
    #[error("failed to open index '{}': {source}", path.display())]
    Open {
        /// The index file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is smaller than header plus table of contents.
    #[error("index too small: {size} bytes, expected at least {min}")]
    TooSmall {
        /// Actual file size.
        size: usize,
        /// Minimum valid size.
        min: usize,
    },

    /// The magic number does not identify an index file.
    #[error("invalid magic number {found:#010x}")]
    InvalidMagic {
        /// The magic number found in the header.
        found: u32,
    },

    /// The index uses a format version this reader does not support.
    #[error("unsupported index version {version}")]
    UnsupportedVersion {
        /// The version byte found in the header.
        version: u8,
    },

    /// A section checksum did not match its contents.
    #[error("checksum mismatch in {section} at offset {offset}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Section name.
        section: &'static str,
        /// Byte offset of the section.
        offset: usize,
        /// Checksum stored in the file.
        expected: u32,
        /// Checksum computed over the contents.
        computed: u32,
    },

    /// A read ran past the end of a section or of the file.
    #[error("unexpected end of data in {section} at offset {offset}")]
    Truncated {
        /// Section name.
        section: &'static str,
        /// Byte offset where more data was expected.
        offset: usize,
    },

    /// A varint was malformed or overflowed.
    #[error("invalid varint in {section}")]
    InvalidVarint {
        /// Section name.
        section: &'static str,
    },

    /// A string in the index is not valid UTF-8.
    #[error("invalid UTF-8 string in {section}")]
    InvalidUtf8 {
        /// Section name.
        section: &'static str,
    },

    /// A symbol reference points outside the symbol table.
    #[error("unknown symbol reference {reference}")]
    UnknownSymbol {
        /// The out-of-range reference.
        reference: u32,
    },

    /// The index contents are structurally inconsistent.
    #[error("corrupted {section}: {reason}")]
    Corrupted {
        /// Section name.
        section: &'static str,
        /// Description of the inconsistency.
        reason: String,
    },
}

/// Errors that can occur when building a label matcher.
#[derive(Error, Debug)]
pub enum MatcherError {
    /// The regular expression does not compile.
    #[error("invalid regex for {name}: '{pattern}': {source}")]
    InvalidRegex {
        /// The label name.
        name: String,
        /// The offending pattern.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },
}

/// Type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
