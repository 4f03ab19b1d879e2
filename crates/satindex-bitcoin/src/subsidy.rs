//! Coinbase subsidy checks and the historical exception table.

use std::collections::BTreeSet;

use satindex_core::types::Network;

/// Heights at which a coinbase is known to have claimed less than the fees of
/// its block, so the unclaimed sats are lost instead of signalling corruption.
fn builtin(network: Network) -> &'static [u64] {
    match network {
        // The coinbase of 501726 pays nothing at all.
        Network::Mainnet => &[501_726],
        Network::Testnet | Network::Signet | Network::Regtest => &[],
    }
}

/// The auditable set of heights allowed to lose fee sats.
#[derive(Debug, Clone, Default)]
pub struct SubsidyExceptions {
    heights: BTreeSet<u64>,
}

impl SubsidyExceptions {
    /// The built-in table for `network` plus operator-supplied heights.
    pub fn new(network: Network, extra: &[u64]) -> Self {
        Self {
            heights: builtin(network).iter().chain(extra).copied().collect(),
        }
    }

    pub fn contains(&self, height: u64) -> bool {
        self.heights.contains(&height)
    }

    pub fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        self.heights.iter().copied()
    }
}

/// Log a coinbase whose net reward differs from the schedule. Never an error.
pub fn check_claimed(network: Network, height: u64, reward: i64) {
    let scheduled = network.subsidy(height);
    if reward < scheduled {
        tracing::warn!(height, reward, scheduled, "Coinbase claimed less than the scheduled subsidy");
    } else if reward > scheduled {
        tracing::warn!(height, reward, scheduled, "Coinbase claimed more than the scheduled subsidy");
    }
}
