//! The benchmark harness: repeated queries under a timer, then one drain.
//!
//! Only the postings of the last repetition are iterated; the earlier ones
//! are dropped unread, so the measured time is the cost of building the
//! query, not of walking its result.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::block::Block;
use crate::config::BenchConfig;
use crate::error::{ConfigError, Error, Result};
use crate::index::IndexReader;
use crate::matcher::Matcher;
use crate::postings::{BoxPostings, Postings};
use crate::querier::postings_for_matchers;

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkResult {
    /// Number of series in the final postings.
    pub matched_series: u64,
    /// Number of times the query was executed.
    pub repetitions: u32,
    /// Wall-clock time across all repetitions.
    pub elapsed: Duration,
}

impl BenchmarkResult {
    /// Mean time per query: `elapsed / repetitions`.
    pub fn mean_query_latency(&self) -> Duration {
        self.elapsed
            .checked_div(self.repetitions)
            .unwrap_or_default()
    }
}

impl Serialize for BenchmarkResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BenchmarkResult", 4)?;
        s.serialize_field("matched_series", &self.matched_series)?;
        s.serialize_field("repetitions", &self.repetitions)?;
        s.serialize_field("elapsed_ns", &nanos(self.elapsed))?;
        s.serialize_field("mean_query_latency_ns", &nanos(self.mean_query_latency()))?;
        s.end()
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Executes `postings_for_matchers` `repetitions` times and returns the last
/// result together with the total elapsed time.
///
/// # Errors
///
/// - [`Error::Config`] if `repetitions` is zero
/// - [`Error::Query`] as soon as one repetition fails
pub fn run_repeated<'a, I>(
    ix: &'a I,
    matchers: &[Matcher],
    repetitions: u32,
) -> Result<(BoxPostings<'a>, Duration)>
where
    I: IndexReader + ?Sized,
{
    if repetitions == 0 {
        return Err(ConfigError::InvalidRepetitions { count: repetitions }.into());
    }

    let start = Instant::now();
    let mut postings = postings_for_matchers(ix, matchers).map_err(Error::Query)?;
    for _ in 1..repetitions {
        postings = postings_for_matchers(ix, matchers).map_err(Error::Query)?;
    }
    let elapsed = start.elapsed();

    Ok((postings, elapsed))
}

/// Iterates `postings` to exhaustion and returns the number of entries.
///
/// # Errors
///
/// Returns [`Error::Iteration`] with the count reached so far if the postings
/// fail.
pub fn drain<P: Postings>(mut postings: P) -> Result<u64> {
    let mut drained = 0u64;
    loop {
        match postings.next() {
            Ok(Some(_)) => drained += 1,
            Ok(None) => return Ok(drained),
            Err(source) => return Err(Error::Iteration { drained, source }),
        }
    }
}

/// Runs the configured query against the block at `block_dir`.
///
/// Stages run in order and the first failure ends the run: config, block,
/// index, matcher, queries, drain.
///
/// # Errors
///
/// Returns the [`Error`] variant of the stage that failed.
///
/// # Examples
///
/// ```rust,no_run
/// use postbench::bench;
/// use postbench::config::BenchConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = bench::run("./data/01HBLOCK", &BenchConfig::default())?;
/// println!("{} series in {:?}", result.matched_series, result.elapsed);
/// # Ok(())
/// # }
/// ```
pub fn run<P: AsRef<Path>>(block_dir: P, config: &BenchConfig) -> Result<BenchmarkResult> {
    let block_dir = block_dir.as_ref();
    if block_dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingBlockDir.into());
    }
    config.validate()?;

    let block = Block::open(block_dir)?;
    let index = block.index().map_err(Error::IndexOpen)?;
    let matcher = config.matcher()?;

    tracing::info!(
        num_series = block.meta().stats.num_series,
        field = %config.field,
        pattern = %config.pattern,
        matcher = %config.matcher_kind,
        repetitions = config.repetitions,
        "start matching time series"
    );

    let (postings, elapsed) =
        run_repeated(&index, std::slice::from_ref(&matcher), config.repetitions)?;
    let matched_series = drain(postings)?;

    let result = BenchmarkResult {
        matched_series,
        repetitions: config.repetitions,
        elapsed,
    };
    tracing::info!(
        n = matched_series,
        took = ?elapsed,
        mean = ?result.mean_query_latency(),
        "matched time series"
    );

    Ok(result)
}
