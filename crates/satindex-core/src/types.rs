//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};

// ─── Network ──────────────────────────────────────────────────────────────────

/// The chain being indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    /// How many recent block hashes to retain for reorg detection.
    ///
    /// Testnet reorganizes deeply and often.
    pub fn default_keep_block_history(&self) -> usize {
        match self {
            Self::Testnet => 72,
            _ => 12,
        }
    }

    /// Blocks between subsidy halvings.
    pub fn subsidy_halving_interval(&self) -> u64 {
        match self {
            Self::Regtest => 150,
            _ => 210_000,
        }
    }

    /// Block subsidy scheduled at `height`, in sats.
    pub fn subsidy(&self, height: u64) -> i64 {
        let halvings = height / self.subsidy_halving_interval();
        if halvings >= 64 {
            0
        } else {
            (50 * 100_000_000i64) >> halvings
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Signet => write!(f, "signet"),
            Self::Regtest => write!(f, "regtest"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "bitcoin" | "main" => Ok(Self::Mainnet),
            "testnet" | "testnet3" | "test" => Ok(Self::Testnet),
            "signet" => Ok(Self::Signet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
