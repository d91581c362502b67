//! Configuration for the consensus node

use ledger_core::{
    Block, BlockHeight, BlockId, Currency, Hash, SiafundOutput, Transaction, UnlockHash,
    SIACOIN_PRECISION,
};
use serde::{Deserialize, Serialize};

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node ID
    pub node_id: String,

    /// Ledger store configuration
    pub ledger: ledger_core::Config,

    /// Chain parameters
    pub chain: ChainParams,

    /// Notification configuration
    pub notifications: NotificationConfig,

    /// Mailbox size of the consensus actor
    pub mailbox_capacity: usize,

    /// Collect Prometheus metrics
    pub metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            ledger: ledger_core::Config::default(),
            chain: ChainParams::default(),
            notifications: NotificationConfig::default(),
            mailbox_capacity: 1000,
            metrics_enabled: true,
        }
    }
}

/// Rules that every node on the chain must agree on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Blocks a payout waits before it can be spent
    pub maturity_delay: BlockHeight,

    /// Subsidy of block 0, in whole coins
    pub initial_coinbase: u64,

    /// Floor of the subsidy, in whole coins
    pub minimum_coinbase: u64,

    /// Timestamp of the genesis block
    pub genesis_timestamp: u64,

    /// Fund outputs created by the genesis block
    pub genesis_siafunds: Vec<SiafundAllocation>,

    /// Check structural invariants after every block
    pub consistency_checks: bool,
}

/// One fund output of the genesis block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundAllocation {
    /// Number of funds
    pub value: u128,
    /// Owner
    pub unlock_hash: UnlockHash,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            maturity_delay: 144,
            initial_coinbase: 300_000,
            minimum_coinbase: 30_000,
            genesis_timestamp: 1_433_600_000,
            genesis_siafunds: vec![SiafundAllocation {
                value: 10_000,
                unlock_hash: UnlockHash(Hash::default()),
            }],
            consistency_checks: true,
        }
    }
}

impl ChainParams {
    /// Subsidy for the block at `height`, before fees
    ///
    /// Decreases by one coin per block until it reaches the minimum.
    pub fn block_subsidy(&self, height: BlockHeight) -> Currency {
        let coins = self
            .initial_coinbase
            .saturating_sub(height)
            .max(self.minimum_coinbase);
        Currency::new(coins as u128 * SIACOIN_PRECISION)
    }

    /// The genesis block, identical on every node with these parameters
    pub fn genesis_block(&self) -> Block {
        let allocation = Transaction {
            siafund_outputs: self
                .genesis_siafunds
                .iter()
                .map(|a| SiafundOutput {
                    value: Currency::new(a.value),
                    unlock_hash: a.unlock_hash,
                })
                .collect(),
            ..Default::default()
        };
        Block::new(
            BlockId::default(),
            self.genesis_timestamp,
            vec![],
            vec![allocation],
        )
    }

    /// Total funds in existence
    pub fn total_siafunds(&self) -> u128 {
        self.genesis_siafunds
            .iter()
            .fold(0u128, |acc, a| acc.saturating_add(a.value))
    }

    /// Reject parameter sets the processor cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.maturity_delay == 0 {
            return Err(crate::Error::Config(
                "maturity_delay must be at least 1".to_string(),
            ));
        }
        if self.minimum_coinbase > self.initial_coinbase {
            return Err(crate::Error::Config(
                "minimum_coinbase exceeds initial_coinbase".to_string(),
            ));
        }
        Ok(())
    }
}

/// Notification bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-subscriber channel size
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.chain.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.ledger = ledger_core::Config::from_env()?;

        if let Ok(node_id) = std::env::var("CONSENSUS_NODE_ID") {
            config.node_id = node_id;
        }

        if let Ok(delay) = std::env::var("CONSENSUS_MATURITY_DELAY") {
            config.chain.maturity_delay = delay
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid maturity delay: {}", e)))?;
        }

        if let Ok(enabled) = std::env::var("CONSENSUS_METRICS_ENABLED") {
            config.metrics_enabled = enabled
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid metrics flag: {}", e)))?;
        }

        config.chain.validate()?;
        Ok(config)
    }
}
