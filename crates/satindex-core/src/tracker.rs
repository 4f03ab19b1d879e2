//! Rolling window of recent block hashes.

use std::collections::VecDeque;

/// Tracks the hashes of the last N indexed blocks.
///
/// Heights are contiguous: pushing a height that does not follow the current
/// head first discards everything at or above it.
#[derive(Debug, Clone)]
pub struct HashWindow {
    /// Oldest first.
    window: VecDeque<(u64, String)>,
    /// Maximum number of blocks to retain.
    window_size: usize,
}

impl HashWindow {
    /// Create a new window. 12 blocks covers mainnet; testnet wants 72.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Record the hash of the block just indexed at `height`.
    pub fn push(&mut self, height: u64, hash: impl Into<String>) {
        self.rewind_to_below(height);
        if let Some((head, _)) = self.window.back() {
            if *head + 1 != height {
                self.window.clear();
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((height, hash.into()));
    }

    /// Height and hash of the most recent block.
    pub fn head(&self) -> Option<(u64, &str)> {
        self.window.back().map(|(h, hash)| (*h, hash.as_str()))
    }

    /// Hash recorded at `height`, if it is still in the window.
    pub fn get(&self, height: u64) -> Option<&str> {
        let (first, _) = self.window.front()?;
        let idx = height.checked_sub(*first)? as usize;
        self.window.get(idx).map(|(_, hash)| hash.as_str())
    }

    /// Lowest height still retained.
    pub fn oldest(&self) -> Option<u64> {
        self.window.front().map(|(h, _)| *h)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window_size
    }

    /// Discard every entry.
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Discard everything at `height` and above.
    fn rewind_to_below(&mut self, height: u64) {
        while let Some((back, _)) = self.window.back() {
            if *back >= height {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }
}
