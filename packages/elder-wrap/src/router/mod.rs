//! Router (Elder) chain access: account queries, fee rates, simulate,
//! broadcast and inclusion lookups.

mod client;
pub mod proto;
pub mod signer;

pub use client::RestRouterClient;

use async_trait::async_trait;

/// Router-chain account state. `sequence` is authoritative only when freshly read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// Synchronous broadcast outcome (mempool admission, not inclusion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    pub tx_hash: String,
    pub code: u32,
    pub raw_log: String,
}

/// An included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxConfirmation {
    pub height: u64,
    /// Execution result; non-zero means included but failed.
    pub code: u32,
    pub raw_log: String,
}

#[async_trait]
pub trait RouterChain: Send + Sync {
    /// Chain id the sign document commits to.
    async fn chain_id(&self) -> Result<String, crate::Error>;

    async fn account(&self, address: &str) -> Result<AccountInfo, crate::Error>;

    /// Minimum fee units per payload byte for a rollapp registration.
    async fn min_fee_rate(&self, registration_id: u64) -> Result<u64, crate::Error>;

    /// Gas used by a signed transaction, without committing it.
    async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64, crate::Error>;

    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<BroadcastResult, crate::Error>;

    /// `None` while the transaction is not (yet) in a block.
    async fn get_by_hash(&self, tx_hash: &str) -> Result<Option<TxConfirmation>, crate::Error>;

    /// Liveness check for health reporting.
    async fn ping(&self) -> Result<(), crate::Error> {
        self.chain_id().await.map(|_| ())
    }
}
