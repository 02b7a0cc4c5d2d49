//! Integration tests for reading blocks written to disk.
//!
//! Blocks are produced with the fixture writer in temporary directories and
//! read back through `Block`, `BlockIndex` and `postings_for_matchers`.

use std::fs;
use std::path::PathBuf;

use postbench::block::{Block, INDEX_FILE, META_FILE};
use postbench::error::{BlockError, IndexError};
use postbench::index::IndexReader;
use postbench::labels::Labels;
use postbench::matcher::{MatchType, Matcher};
use postbench::postings::expand;
use postbench::querier::postings_for_matchers;
use postbench::writer::BlockWriter;
use tempfile::{TempDir, tempdir};

/// 3 jobs x 4 pods, half of the pods named `abc-*`.
fn sample_series() -> Vec<Labels> {
    let mut series = Vec::new();
    for job in ["api", "db", "cache"] {
        for (i, prefix) in ["abc", "xyz", "abc", "xyz"].iter().enumerate() {
            let pod = format!("{prefix}-{job}-{i}");
            series.push(Labels::from_pairs([
                ("__name__", "up"),
                ("job", job),
                ("pod", pod.as_str()),
            ]));
        }
    }
    series
}

fn write_block(series: Vec<Labels>) -> (TempDir, PathBuf) {
    let temp_dir = tempdir().unwrap();
    let block_dir = BlockWriter::new(series).write(temp_dir.path()).unwrap();
    (temp_dir, block_dir)
}

fn count(index: &impl IndexReader, matchers: &[Matcher]) -> usize {
    expand(postings_for_matchers(index, matchers).unwrap())
        .unwrap()
        .len()
}

#[test]
fn test_block_roundtrip() {
    let (_tmp, block_dir) = write_block(sample_series());
    let block = Block::open(&block_dir).unwrap();
    assert_eq!(block.meta().stats.num_series, 12);
    assert_eq!(block.meta().version, 1);

    let index = block.index().unwrap();
    assert_eq!(index.label_names(), vec!["__name__", "job", "pod"]);
    assert_eq!(index.label_values("job").unwrap(), vec!["api", "cache", "db"]);
    assert_eq!(index.label_values("pod").unwrap().len(), 12);

    let all = expand(index.all_postings().unwrap()).unwrap();
    assert_eq!(all.len(), 12);
    for r in all {
        let labels = index.series(r).unwrap();
        assert_eq!(labels.get("__name__"), Some("up"));
        assert_eq!(labels.len(), 3);
    }
}

#[test]
fn test_default_query_matches_prefix() {
    let (_tmp, block_dir) = write_block(sample_series());
    let index = Block::open(&block_dir).unwrap().index().unwrap();

    let m = Matcher::new(MatchType::Regexp, "pod", "^abc.*$").unwrap();
    let refs = expand(postings_for_matchers(&index, &[m]).unwrap()).unwrap();
    assert_eq!(refs.len(), 6);
    for r in refs {
        let labels = index.series(r).unwrap();
        assert!(labels.get("pod").unwrap().starts_with("abc"));
    }
}

#[test]
fn test_zero_and_match_all() {
    let (_tmp, block_dir) = write_block(sample_series());
    let block = Block::open(&block_dir).unwrap();
    let index = block.index().unwrap();

    let none = Matcher::new(MatchType::Regexp, "pod", "^nomatch.*$").unwrap();
    assert_eq!(count(&index, &[none]), 0);

    let all = Matcher::new(MatchType::Regexp, "pod", ".+").unwrap();
    assert_eq!(
        count(&index, &[all]) as u64,
        block.meta().stats.num_series
    );
}

#[test]
fn test_combined_matchers() {
    let (_tmp, block_dir) = write_block(sample_series());
    let index = Block::open(&block_dir).unwrap().index().unwrap();

    let job = Matcher::new(MatchType::Equal, "job", "db").unwrap();
    let abc = Matcher::new(MatchType::Regexp, "pod", "abc-.*").unwrap();
    let not_api = Matcher::new(MatchType::NotEqual, "job", "api").unwrap();
    let set = Matcher::new(MatchType::Regexp, "job", "api|cache").unwrap();
    let no_zone = Matcher::new(MatchType::Equal, "zone", "").unwrap();

    assert_eq!(count(&index, &[job.clone(), abc.clone()]), 2);
    assert_eq!(count(&index, &[not_api, abc.clone()]), 4);
    assert_eq!(count(&index, &[set]), 8);
    // No series has a zone label, so `zone=""` selects everything.
    assert_eq!(count(&index, &[no_zone.clone()]), 12);
    assert_eq!(count(&index, &[no_zone, job]), 4);
}

#[test]
fn test_missing_block_parts() {
    let (_tmp, block_dir) = write_block(sample_series());

    fs::remove_file(block_dir.join(INDEX_FILE)).unwrap();
    assert!(matches!(
        Block::open(&block_dir),
        Err(BlockError::MissingIndex { .. })
    ));

    fs::remove_file(block_dir.join(META_FILE)).unwrap();
    assert!(matches!(
        Block::open(&block_dir),
        Err(BlockError::MetaRead { .. })
    ));
}

#[test]
fn test_corrupted_index_rejected() {
    let (_tmp, block_dir) = write_block(sample_series());
    let index_path = block_dir.join(INDEX_FILE);
    let mut bytes = fs::read(&index_path).unwrap();

    // Damage the symbol table contents; its checksum no longer matches.
    bytes[10] ^= 0xFF;
    fs::write(&index_path, &bytes).unwrap();

    let block = Block::open(&block_dir).unwrap();
    assert!(matches!(
        block.index(),
        Err(IndexError::ChecksumMismatch {
            section: "symbols",
            ..
        })
    ));
}

#[test]
fn test_empty_block() {
    let (_tmp, block_dir) = write_block(Vec::new());
    let block = Block::open(&block_dir).unwrap();
    assert_eq!(block.meta().stats.num_series, 0);

    let index = block.index().unwrap();
    assert!(index.label_names().is_empty());
    let m = Matcher::new(MatchType::Regexp, "pod", ".*").unwrap();
    assert_eq!(count(&index, &[m]), 0);
}
