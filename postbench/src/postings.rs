//! Postings: forward-only, fallible sequences of series references.
//!
//! A postings list is the sorted set of series that carry a given label pair.
//! Queries combine lists with [`merge`] (union), [`intersect`] and
//! [`without`] (difference). All combinators are lazy: no reference is read
//! from the index until the caller advances the result.
//!
//! Every step of a [`Postings`] returns one of three outcomes:
//!
//! - `Ok(Some(ref))`: the next reference
//! - `Ok(None)`: the sequence is exhausted
//! - `Err(_)`: the sequence failed and must not be advanced again
//!
//! Exhaustion and failure are therefore never confused with each other.
//!
//! # Example
//!
//! ```rust
//! use postbench::postings::{expand, intersect, ListPostings};
//!
//! let a = ListPostings::boxed(vec![1, 3, 5, 7]);
//! let b = ListPostings::boxed(vec![3, 4, 7]);
//! assert_eq!(expand(intersect(vec![a, b]))?, vec![3, 7]);
//! # Ok::<(), postbench::error::IndexError>(())
//! ```

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use crate::error::IndexError;

/// Identifier of a series within one block's index.
pub type SeriesRef = u64;

/// A one-shot, forward-only sequence of series references in ascending order.
pub trait Postings {
    /// Advances to the next reference.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the underlying data cannot be read.
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError>;

    /// Advances to the first reference `>= target`.
    ///
    /// Never moves backwards: if the current reference is already `>= target`
    /// it is returned again.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the underlying data cannot be read.
    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError>;
}

impl<P: Postings + ?Sized> Postings for Box<P> {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        (**self).next()
    }

    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        (**self).seek(target)
    }
}

/// Boxed postings borrowing from an index for `'a`.
pub type BoxPostings<'a> = Box<dyn Postings + 'a>;

/// Postings with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPostings;

impl EmptyPostings {
    /// Returns an empty postings list as a trait object.
    pub fn boxed<'a>() -> BoxPostings<'a> {
        Box::new(Self)
    }
}

impl Postings for EmptyPostings {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        Ok(None)
    }

    fn seek(&mut self, _target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        Ok(None)
    }
}

/// Postings that fail on their first step.
#[derive(Debug)]
pub struct ErrPostings {
    err: Option<IndexError>,
}

impl ErrPostings {
    /// Creates postings that yield `err` once, then report exhaustion.
    pub fn new(err: IndexError) -> Self {
        Self { err: Some(err) }
    }

    fn fail(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

impl Postings for ErrPostings {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        self.fail()
    }

    fn seek(&mut self, _target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        self.fail()
    }
}

/// Owned, in-memory postings over a sorted list.
#[derive(Debug, Clone, Default)]
pub struct ListPostings {
    list: Vec<SeriesRef>,
    /// Index of the next unread element.
    pos: usize,
    cur: Option<SeriesRef>,
}

impl ListPostings {
    /// Creates postings over `list`, which must be sorted ascending.
    pub fn new(list: Vec<SeriesRef>) -> Self {
        Self {
            list,
            pos: 0,
            cur: None,
        }
    }

    /// Creates boxed postings over `list`.
    pub fn boxed<'a>(list: Vec<SeriesRef>) -> BoxPostings<'a> {
        Box::new(Self::new(list))
    }

    fn take_at_pos(&mut self) -> Option<SeriesRef> {
        self.cur = self.list.get(self.pos).copied();
        if self.cur.is_some() {
            self.pos += 1;
        }
        self.cur
    }
}

impl Postings for ListPostings {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        Ok(self.take_at_pos())
    }

    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        if let Some(cur) = self.cur
            && cur >= target
        {
            return Ok(Some(cur));
        }
        self.pos += self.list[self.pos..].partition_point(|&v| v < target);
        Ok(self.take_at_pos())
    }
}

/// Postings decoded lazily from a big-endian `u32` array, as stored in the
/// index file.
pub struct BigEndianPostings<'a> {
    data: &'a [u8],
    /// Index (in entries, not bytes) of the next unread entry.
    pos: usize,
    cur: Option<SeriesRef>,
}

impl<'a> BigEndianPostings<'a> {
    /// Creates postings over `data`, whose length must be a multiple of 4.
    pub(crate) fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len() % 4, 0);
        Self {
            data,
            pos: 0,
            cur: None,
        }
    }

    fn len(&self) -> usize {
        self.data.len() / 4
    }

    fn at(&self, i: usize) -> SeriesRef {
        let b = &self.data[i * 4..i * 4 + 4];
        SeriesRef::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_at_pos(&mut self) -> Option<SeriesRef> {
        if self.pos < self.len() {
            self.cur = Some(self.at(self.pos));
            self.pos += 1;
        } else {
            self.cur = None;
        }
        self.cur
    }
}

impl fmt::Debug for BigEndianPostings<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigEndianPostings")
            .field("len", &self.len())
            .field("pos", &self.pos)
            .field("cur", &self.cur)
            .finish()
    }
}

impl Postings for BigEndianPostings<'_> {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        Ok(self.take_at_pos())
    }

    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        if let Some(cur) = self.cur
            && cur >= target
        {
            return Ok(Some(cur));
        }
        // Binary search for the first entry >= target in the unread range.
        let (mut lo, mut hi) = (self.pos, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.at(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.pos = lo;
        Ok(self.take_at_pos())
    }
}

/// Returns the sorted, deduplicated union of `its`.
pub fn merge<'a>(mut its: Vec<BoxPostings<'a>>) -> BoxPostings<'a> {
    match its.len() {
        0 => EmptyPostings::boxed(),
        1 => its.remove(0),
        _ => Box::new(MergedPostings {
            its,
            heap: BinaryHeap::new(),
            initialized: false,
            cur: None,
        }),
    }
}

struct MergedPostings<'a> {
    its: Vec<BoxPostings<'a>>,
    /// Head value of each non-exhausted input, keyed by input index.
    heap: BinaryHeap<Reverse<(SeriesRef, usize)>>,
    initialized: bool,
    cur: Option<SeriesRef>,
}

impl MergedPostings<'_> {
    fn init(&mut self) -> Result<(), IndexError> {
        if !self.initialized {
            self.initialized = true;
            for (i, it) in self.its.iter_mut().enumerate() {
                if let Some(v) = it.next()? {
                    self.heap.push(Reverse((v, i)));
                }
            }
        }
        Ok(())
    }

    fn pop_next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        while let Some(Reverse((v, i))) = self.heap.pop() {
            if let Some(next) = self.its[i].next()? {
                self.heap.push(Reverse((next, i)));
            }
            if self.cur == Some(v) {
                continue;
            }
            self.cur = Some(v);
            return Ok(Some(v));
        }
        self.cur = None;
        Ok(None)
    }
}

impl Postings for MergedPostings<'_> {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        self.init()?;
        self.pop_next()
    }

    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        if let Some(cur) = self.cur
            && cur >= target
        {
            return Ok(Some(cur));
        }
        self.init()?;
        let heads = std::mem::take(&mut self.heap).into_vec();
        for Reverse((v, i)) in heads {
            if v >= target {
                self.heap.push(Reverse((v, i)));
            } else if let Some(next) = self.its[i].seek(target)? {
                self.heap.push(Reverse((next, i)));
            }
        }
        self.pop_next()
    }
}

/// Returns the references present in every one of `its`.
///
/// The intersection of no lists is empty.
pub fn intersect<'a>(mut its: Vec<BoxPostings<'a>>) -> BoxPostings<'a> {
    match its.len() {
        0 => EmptyPostings::boxed(),
        1 => its.remove(0),
        _ => Box::new(IntersectPostings {
            its,
            cur: None,
            done: false,
        }),
    }
}

struct IntersectPostings<'a> {
    its: Vec<BoxPostings<'a>>,
    cur: Option<SeriesRef>,
    done: bool,
}

impl IntersectPostings<'_> {
    /// Seeks every input to `target` until all of them agree on a value.
    fn align(&mut self, mut target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        'outer: loop {
            for i in 0..self.its.len() {
                match self.its[i].seek(target)? {
                    None => {
                        self.done = true;
                        self.cur = None;
                        return Ok(None);
                    }
                    Some(v) if v > target => {
                        target = v;
                        continue 'outer;
                    }
                    Some(_) => {}
                }
            }
            self.cur = Some(target);
            return Ok(Some(target));
        }
    }
}

impl Postings for IntersectPostings<'_> {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        if self.done {
            return Ok(None);
        }
        match self.its[0].next()? {
            Some(v) => self.align(v),
            None => {
                self.done = true;
                self.cur = None;
                Ok(None)
            }
        }
    }

    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        if self.done {
            return Ok(None);
        }
        if let Some(cur) = self.cur
            && cur >= target
        {
            return Ok(Some(cur));
        }
        self.align(target)
    }
}

/// Returns the references of `full` that are not in `drop`.
pub fn without<'a>(full: BoxPostings<'a>, drop: BoxPostings<'a>) -> BoxPostings<'a> {
    Box::new(WithoutPostings {
        full,
        drop,
        drop_done: false,
        cur: None,
    })
}

struct WithoutPostings<'a> {
    full: BoxPostings<'a>,
    drop: BoxPostings<'a>,
    drop_done: bool,
    cur: Option<SeriesRef>,
}

impl WithoutPostings<'_> {
    fn skip_dropped(&mut self, mut next: Option<SeriesRef>) -> Result<Option<SeriesRef>, IndexError> {
        while let Some(v) = next {
            if !self.drop_done {
                match self.drop.seek(v)? {
                    None => self.drop_done = true,
                    Some(d) if d == v => {
                        next = self.full.next()?;
                        continue;
                    }
                    Some(_) => {}
                }
            }
            self.cur = Some(v);
            return Ok(Some(v));
        }
        self.cur = None;
        Ok(None)
    }
}

impl Postings for WithoutPostings<'_> {
    fn next(&mut self) -> Result<Option<SeriesRef>, IndexError> {
        let next = self.full.next()?;
        self.skip_dropped(next)
    }

    fn seek(&mut self, target: SeriesRef) -> Result<Option<SeriesRef>, IndexError> {
        if let Some(cur) = self.cur
            && cur >= target
        {
            return Ok(Some(cur));
        }
        let next = self.full.seek(target)?;
        self.skip_dropped(next)
    }
}

/// Reads `p` to exhaustion into a vector.
///
/// # Errors
///
/// Returns the first error raised by `p`.
pub fn expand<P: Postings>(mut p: P) -> Result<Vec<SeriesRef>, IndexError> {
    let mut out = Vec::new();
    while let Some(v) = p.next()? {
        out.push(v);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(v: &[SeriesRef]) -> BoxPostings<'static> {
        ListPostings::boxed(v.to_vec())
    }

    fn be_bytes(v: &[u32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_be_bytes()).collect()
    }

    fn failing() -> IndexError {
        IndexError::Corrupted {
            section: "postings",
            reason: "injected".to_string(),
        }
    }

    #[test]
    fn test_list_next_and_seek() {
        let mut p = ListPostings::new(vec![2, 4, 6, 8, 10]);
        assert_eq!(p.next().unwrap(), Some(2));
        assert_eq!(p.seek(1).unwrap(), Some(2)); // never moves backwards
        assert_eq!(p.seek(5).unwrap(), Some(6));
        assert_eq!(p.seek(6).unwrap(), Some(6));
        assert_eq!(p.next().unwrap(), Some(8));
        assert_eq!(p.seek(11).unwrap(), None);
        assert_eq!(p.next().unwrap(), None);
    }

    #[test]
    fn test_big_endian_matches_list() {
        let refs = [1u32, 5, 9, 200, 70_000];
        let data = be_bytes(&refs);
        let mut p = BigEndianPostings::new(&data);
        assert_eq!(p.seek(6).unwrap(), Some(9));
        assert_eq!(p.next().unwrap(), Some(200));
        assert_eq!(p.seek(70_000).unwrap(), Some(70_000));
        assert_eq!(p.next().unwrap(), None);

        let all = expand(BigEndianPostings::new(&data)).unwrap();
        assert_eq!(all, vec![1, 5, 9, 200, 70_000]);
    }

    #[test]
    fn test_merge_dedups() {
        let p = merge(vec![list(&[1, 3, 5]), list(&[2, 3, 6]), list(&[]), list(&[5, 9])]);
        assert_eq!(expand(p).unwrap(), vec![1, 2, 3, 5, 6, 9]);
    }

    #[test]
    fn test_merge_seek() {
        let mut p = merge(vec![list(&[1, 3, 5, 7]), list(&[2, 6, 8])]);
        assert_eq!(p.seek(4).unwrap(), Some(5));
        assert_eq!(p.seek(4).unwrap(), Some(5));
        assert_eq!(p.next().unwrap(), Some(6));
        assert_eq!(p.seek(8).unwrap(), Some(8));
        assert_eq!(p.next().unwrap(), None);
    }

    #[test]
    fn test_intersect() {
        let p = intersect(vec![list(&[1, 2, 3, 4, 5, 8]), list(&[2, 4, 5, 8, 9]), list(&[0, 4, 8])]);
        assert_eq!(expand(p).unwrap(), vec![4, 8]);

        let p = intersect(vec![list(&[1, 2]), list(&[3, 4])]);
        assert!(expand(p).unwrap().is_empty());

        assert!(expand(intersect(Vec::new())).unwrap().is_empty());
    }

    #[test]
    fn test_intersect_seek() {
        let mut p = intersect(vec![list(&[1, 3, 5, 7, 9]), list(&[3, 5, 9])]);
        assert_eq!(p.seek(4).unwrap(), Some(5));
        assert_eq!(p.next().unwrap(), Some(9));
        assert_eq!(p.next().unwrap(), None);
        assert_eq!(p.seek(1).unwrap(), None);
    }

    #[test]
    fn test_without() {
        let p = without(list(&[1, 2, 3, 4, 5]), list(&[2, 4, 10]));
        assert_eq!(expand(p).unwrap(), vec![1, 3, 5]);

        let p = without(list(&[1, 2]), EmptyPostings::boxed());
        assert_eq!(expand(p).unwrap(), vec![1, 2]);

        let mut p = without(list(&[1, 2, 3, 4]), list(&[3]));
        assert_eq!(p.seek(3).unwrap(), Some(4));
    }

    #[test]
    fn test_errors_propagate_through_combinators() {
        let p = merge(vec![list(&[1, 2]), Box::new(ErrPostings::new(failing()))]);
        assert!(expand(p).is_err());

        let p = intersect(vec![list(&[1, 2]), Box::new(ErrPostings::new(failing()))]);
        assert!(expand(p).is_err());

        let p = without(list(&[1, 2]), Box::new(ErrPostings::new(failing())));
        assert!(expand(p).is_err());
    }

    #[test]
    fn test_err_postings_reports_once() {
        let mut p = ErrPostings::new(failing());
        assert!(p.next().is_err());
        assert_eq!(p.next().unwrap(), None);
    }
}
