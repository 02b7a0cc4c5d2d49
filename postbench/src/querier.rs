//! Compilation of label matchers into postings.
//!
//! A label that is not set on a series behaves as if it had the empty value.
//! Matchers that do not match `""` therefore require their label to be set
//! and contribute positive postings; matchers that do match `""` can only
//! exclude series, so they contribute postings to subtract.

use std::collections::HashSet;

use crate::error::IndexError;
use crate::index::{ALL_POSTINGS_KEY, IndexReader};
use crate::matcher::{MatchType, Matcher};
use crate::postings::{BoxPostings, EmptyPostings, intersect, without};

/// Returns the postings of the series that satisfy every matcher.
///
/// No matchers select nothing.
///
/// # Errors
///
/// Returns an [`IndexError`] if the index fails while resolving label values
/// or postings lists. Errors while iterating the result surface from the
/// returned postings.
///
/// # Examples
///
/// ```rust,no_run
/// use postbench::block::Block;
/// use postbench::matcher::{MatchType, Matcher};
/// use postbench::postings::expand;
/// use postbench::querier::postings_for_matchers;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let index = Block::open("./data/01HBLOCK")?.index()?;
/// let pod = Matcher::new(MatchType::Regexp, "pod", "^abc.*$")?;
/// let refs = expand(postings_for_matchers(&index, &[pod])?)?;
/// println!("{} series", refs.len());
/// # Ok(())
/// # }
/// ```
pub fn postings_for_matchers<'a, I>(
    ix: &'a I,
    matchers: &[Matcher],
) -> Result<BoxPostings<'a>, IndexError>
where
    I: IndexReader + ?Sized,
{
    if matchers.is_empty() {
        return Ok(EmptyPostings::boxed());
    }

    let label_must_be_set: HashSet<&str> = matchers
        .iter()
        .filter(|m| !m.matches(""))
        .map(Matcher::name)
        .collect();

    let mut its = Vec::new();
    let mut not_its = Vec::new();
    for m in matchers {
        if label_must_be_set.contains(m.name()) {
            let matches_empty = m.matches("");
            match (m.kind().is_negated(), matches_empty) {
                // l!="foo": drop the series that have l="foo".
                (true, true) => not_its.push(postings_for_matcher(ix, &m.inverse())?),
                // l!="": keep the series whose value is not "".
                (true, false) => its.push(inverse_postings_for_matcher(ix, &m.inverse())?),
                // l="a", l=~"re"
                (false, _) => its.push(postings_for_matcher(ix, m)?),
            }
        } else {
            // l="", l=~"a|": drop the series with a non-matching value.
            not_its.push(inverse_postings_for_matcher(ix, m)?);
        }
    }

    tracing::trace!(
        positive = its.len(),
        negative = not_its.len(),
        "compiled matchers"
    );

    if its.is_empty() && !not_its.is_empty() {
        let (name, value) = ALL_POSTINGS_KEY;
        its.push(ix.postings(name, &[value.to_string()])?);
    }

    let mut it = intersect(its);
    for n in not_its {
        it = without(it, n);
    }
    Ok(it)
}

/// Postings of the series whose value for the matcher's label matches.
fn postings_for_matcher<'a, I>(ix: &'a I, m: &Matcher) -> Result<BoxPostings<'a>, IndexError>
where
    I: IndexReader + ?Sized,
{
    if m.kind() == MatchType::Equal {
        return ix.postings(m.name(), &[m.value().to_string()]);
    }
    if let Some(set) = m.set_matches() {
        return ix.postings(m.name(), &set);
    }

    let values: Vec<String> = ix
        .label_values(m.name())?
        .into_iter()
        .filter(|v| m.matches(v))
        .collect();
    if values.is_empty() {
        return Ok(EmptyPostings::boxed());
    }
    ix.postings(m.name(), &values)
}

/// Postings of the series that have the label set to a non-matching value.
fn inverse_postings_for_matcher<'a, I>(
    ix: &'a I,
    m: &Matcher,
) -> Result<BoxPostings<'a>, IndexError>
where
    I: IndexReader + ?Sized,
{
    let values: Vec<String> = ix
        .label_values(m.name())?
        .into_iter()
        .filter(|v| !m.matches(v))
        .collect();
    if values.is_empty() {
        return Ok(EmptyPostings::boxed());
    }
    ix.postings(m.name(), &values)
}
