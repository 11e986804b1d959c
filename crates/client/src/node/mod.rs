//! Transport layer. `ChainNode` is the websocket view of a Substrate
//! chain, `EvmNode` the Ethereum-RPC view of the same chain. Both are
//! traits so decoders and clients can run against in-memory fakes.

pub mod evm;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// Broken sockets, timeouts and malformed responses. These are the
    /// faults worth tearing the connection down and retrying for.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("unable to decode chain data: {0}")]
    Decode(String),

    #[error("block {0} not found")]
    MissingBlock(u64),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transport(_))
    }
}

/// An extrinsic argument as found on chain: its name, the declared
/// type name from metadata (short form, e.g. `Balance`) and the value
/// rendered as JSON with byte blobs normalized to `0x` hex strings.
#[derive(Debug, Clone)]
pub struct RawArg {
    pub name: String,
    pub type_name: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct RawExtrinsic {
    pub block: u64,
    pub index: u32,
    pub pallet: String,
    pub function: String,
    /// Hex address of the signer, absent for unsigned extrinsics.
    pub signer: Option<String>,
    pub args: Vec<RawArg>,
}

impl RawExtrinsic {
    pub fn id(&self) -> String {
        format!("{}-{}", self.block, self.index)
    }
}

#[derive(Debug, Clone)]
pub struct ChainEvent {
    pub pallet: String,
    pub name: String,
    /// Event attributes in declaration order.
    pub fields: Vec<Value>,
}

/// Execution outcome of a single extrinsic.
#[derive(Debug, Clone, Default)]
pub struct ExtrinsicReceipt {
    pub error_message: Option<String>,
    pub events: Vec<ChainEvent>,
}

impl ExtrinsicReceipt {
    pub fn succeeded(&self) -> bool {
        self.error_message.is_none()
    }
}

#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Number of the latest finalized block.
    async fn last_block_number(&self) -> Result<u64, NodeError>;

    async fn block_hash(&self, number: u64) -> Result<String, NodeError>;

    async fn block_extrinsics(&self, number: u64) -> Result<Vec<RawExtrinsic>, NodeError>;

    async fn block_events(&self, number: u64) -> Result<Vec<ChainEvent>, NodeError>;

    async fn extrinsic_receipt(&self, block: u64, index: u32)
    -> Result<ExtrinsicReceipt, NodeError>;

    /// Fetch one storage entry, optionally pinned to a block hash.
    async fn query(
        &self,
        pallet: &str,
        entry: &str,
        keys: &[Value],
        at: Option<&str>,
    ) -> Result<Option<Value>, NodeError>;

    /// Iterate a storage map, yielding `(key, value)` pairs where the
    /// key is the hex form of the map key's trailing bytes.
    async fn query_map(
        &self,
        pallet: &str,
        entry: &str,
        page_size: u32,
        at: Option<&str>,
    ) -> Result<Vec<(String, Value)>, NodeError>;

    async fn constant(&self, pallet: &str, name: &str) -> Result<Value, NodeError>;

    async fn token_decimals(&self) -> Result<u32, NodeError>;

    async fn token_symbol(&self) -> Result<String, NodeError>;
}

#[derive(Debug, Clone)]
pub struct EvmTransaction {
    pub from: Option<String>,
    pub to: Option<String>,
    pub input: Vec<u8>,
    pub transaction_index: u32,
}

#[async_trait]
pub trait EvmNode: Send + Sync {
    /// Transaction at `index` within `block`, `None` when the index is
    /// past the end of the block.
    async fn transaction_by_index(
        &self,
        block: u64,
        index: u32,
    ) -> Result<Option<EvmTransaction>, NodeError>;
}
