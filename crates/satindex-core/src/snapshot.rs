//! Snapshot/commit contract shared by every buffered sub-index.
//!
//! A flush works on a clone of the live delta. Once the clone is durable the
//! live buffer sheds exactly what the clone wrote: append-only buffers keep
//! their tail beyond the cloned length, map-like buffers drop an entry only
//! if it is unchanged since the clone was taken. Nothing is reloaded from
//! storage.

use std::collections::HashMap;
use std::hash::Hash;

/// A buffer of not-yet-persisted index state.
pub trait Buffered {
    /// An independent deep copy of the live delta. Shares no mutable
    /// containers with `self`.
    fn clone_delta(&self) -> Self;

    /// Remove from `self` what `flushed` (an earlier `clone_delta` of `self`
    /// that has since been persisted) already wrote.
    fn subtract(&mut self, flushed: &Self);
}

/// Drop the first `flushed_len` entries of an append-only buffer.
pub fn subtract_prefix<T>(live: &mut Vec<T>, flushed_len: usize) {
    let n = flushed_len.min(live.len());
    live.drain(..n);
}

/// Drop entries of `live` that still hold the value recorded in `flushed`.
pub fn subtract_unchanged<K, V>(live: &mut HashMap<K, V>, flushed: &HashMap<K, V>)
where
    K: Eq + Hash,
    V: PartialEq,
{
    for (key, value) in flushed {
        if live.get(key) == Some(value) {
            live.remove(key);
        }
    }
}
