//! Ordinal range algebra.
//!
//! Every satoshi has a position in the global ordinal space. A UTXO carries
//! the ordered list of half-open ranges `[start, start + size)` it holds. The
//! functions here move sats between such lists without creating, destroying,
//! or duplicating any of them. They are pure and never mutate their inputs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A contiguous run of sats: `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: i64,
    pub size: i64,
}

/// An ordered list of ranges.
pub type RangeList = Vec<Range>;

impl Range {
    pub fn new(start: i64, size: i64) -> Self {
        Self { start, size }
    }

    /// One past the last sat of the range.
    pub fn end(&self) -> i64 {
        self.start + self.size
    }

    /// Returns `true` if `next` starts exactly where `self` ends.
    pub fn touches(&self, next: &Range) -> bool {
        self.end() == next.start
    }
}

/// Contract violations of the range algebra.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("cannot cut {requested} sats from a pool holding {available}")]
    Insufficient { requested: i64, available: i64 },

    #[error("negative amount {0}")]
    Negative(i64),
}

/// Sum of all range sizes.
pub fn total_size(ranges: &[Range]) -> i64 {
    ranges.iter().map(|r| r.size).sum()
}

/// Returns a copy of `ranges` with empty ranges dropped and adjacent ranges fused.
pub fn compact(ranges: &[Range]) -> RangeList {
    let mut out: RangeList = Vec::with_capacity(ranges.len());
    for r in ranges {
        push_merged(&mut out, *r);
    }
    out
}

/// Appends `src` onto `dst`, fusing the boundary if the two lists touch.
///
/// `src` is compacted and copied. Order is preserved: the sats of `dst` come
/// first, which is what makes the first input of a transaction pay the first
/// output.
pub fn append(dst: &mut RangeList, src: &[Range]) {
    for r in compact(src) {
        push_merged(dst, r);
    }
}

/// Cuts `amount` sats off the front of `pool`.
///
/// Returns `(taken, remaining)`. `taken` always totals `amount`; a pool that
/// cannot cover it is an upstream conservation failure and yields
/// [`RangeError::Insufficient`]. Cutting zero sats returns an empty `taken`
/// and the pool unchanged.
pub fn transfer(pool: &[Range], amount: i64) -> Result<(RangeList, RangeList), RangeError> {
    if amount < 0 {
        return Err(RangeError::Negative(amount));
    }
    if amount == 0 {
        return Ok((Vec::new(), pool.to_vec()));
    }

    let mut taken = Vec::new();
    let mut need = amount;
    let mut idx = 0;
    let mut split: Option<Range> = None;

    while need > 0 && idx < pool.len() {
        let r = pool[idx];
        idx += 1;
        if r.size <= need {
            push_merged(&mut taken, r);
            need -= r.size;
        } else {
            push_merged(&mut taken, Range::new(r.start, need));
            split = Some(Range::new(r.start + need, r.size - need));
            need = 0;
        }
    }

    if need > 0 {
        return Err(RangeError::Insufficient {
            requested: amount,
            available: amount - need,
        });
    }

    let mut remaining = Vec::with_capacity(pool.len() - idx + 1);
    remaining.extend(split);
    remaining.extend(pool[idx..].iter().copied().filter(|r| r.size > 0));
    Ok((taken, remaining))
}

fn push_merged(list: &mut RangeList, r: Range) {
    if r.size == 0 {
        return;
    }
    match list.last_mut() {
        Some(last) if last.touches(&r) => last.size += r.size,
        _ => list.push(r),
    }
}
