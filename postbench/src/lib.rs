//! # postbench
//!
//! Query latency harness for the postings index of persisted time-series
//! blocks.
//!
//! postbench opens a block directory, builds a label matcher, evaluates it
//! against the block's index a configured number of times under a wall-clock
//! timer, and drains the final result to a count. It runs in-process against
//! on-disk index data, with no server in the loop.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Memory-mapped, read-only index reader with checksum-verified sections
//! - Lazy postings: nothing is decoded until the result is iterated
//! - Only the last repetition's result is drained, so the timer measures query
//!   construction rather than iteration
//! - Single-threaded and synchronous; every stage returns a typed error
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use postbench::{BenchConfig, MatchType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BenchConfig {
//!     field: "pod".to_string(),
//!     pattern: "^abc.*$".to_string(),
//!     matcher_kind: MatchType::Regexp,
//!     repetitions: 84,
//! };
//!
//! let result = postbench::bench::run("./data/01HBLOCK", &config)?;
//! println!(
//!     "{} series, {:?} total, {:?} per query",
//!     result.matched_series,
//!     result.elapsed,
//!     result.mean_query_latency()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Block`]: an opened block directory and its `meta.json`
//! - [`BlockIndex`]: the memory-mapped index of a block
//! - [`Matcher`]: a predicate over one label's value
//! - [`postings_for_matchers`]: compiles matchers into lazy [`Postings`]
//! - [`BenchConfig`] and [`bench::run`]: the harness
//!
//! ## Modules
//!
//! - [`block`]: block directory layout and metadata
//! - [`index`]: index file reader
//! - [`postings`]: postings trait and set combinators
//! - [`matcher`]: label matchers
//! - [`querier`]: matchers to postings
//! - [`bench`]: repeated queries, drain and result
//! - [`config`]: benchmark configuration
//! - [`writer`]: writes blocks for tests and benches
//! - [`labels`]: label sets
//! - [`error`]: error types

pub mod bench;
pub mod block;
pub mod config;
mod encoding;
pub mod error;
pub mod index;
pub mod labels;
pub mod matcher;
pub mod postings;
pub mod querier;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use bench::BenchmarkResult;
pub use block::{Block, BlockMeta};
pub use config::BenchConfig;
pub use error::{Error, Result};
pub use index::{BlockIndex, IndexReader};
pub use labels::Labels;
pub use matcher::{MatchType, Matcher};
pub use postings::{Postings, SeriesRef};
pub use querier::postings_for_matchers;
