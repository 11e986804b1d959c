//! In-memory fakes for the transport traits.

use super::{
    ChainEvent, ChainNode, EvmNode, EvmTransaction, ExtrinsicReceipt, NodeError, RawExtrinsic,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

fn storage_key(pallet: &str, entry: &str, keys: &[Value], at: Option<&str>) -> String {
    let keys = keys
        .iter()
        .map(|k| match k {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{pallet}.{entry}:{keys}@{}", at.unwrap_or("latest"))
}

#[derive(Default)]
pub struct MockChainNode {
    pub last_block: u64,
    /// When set, block reads past `last_block` fail the way a real
    /// node does instead of reporting an empty block.
    pub strict_head: bool,
    pub extrinsics: HashMap<u64, Vec<RawExtrinsic>>,
    pub events: HashMap<u64, Vec<ChainEvent>>,
    pub receipts: HashMap<(u64, u32), ExtrinsicReceipt>,
    storage: HashMap<String, Value>,
    maps: HashMap<String, Vec<(String, Value)>>,
    pub constants: HashMap<String, Value>,
    pub decimals: u32,
    pub symbol: String,
}

impl MockChainNode {
    pub fn new(last_block: u64) -> Self {
        Self {
            last_block,
            decimals: 18,
            symbol: "DEV".to_string(),
            ..Default::default()
        }
    }

    pub fn set_storage(
        &mut self,
        pallet: &str,
        entry: &str,
        keys: &[Value],
        at: Option<&str>,
        value: Value,
    ) {
        self.storage
            .insert(storage_key(pallet, entry, keys, at), value);
    }

    pub fn set_map(
        &mut self,
        pallet: &str,
        entry: &str,
        at: Option<&str>,
        pairs: Vec<(String, Value)>,
    ) {
        self.maps
            .insert(storage_key(pallet, entry, &[], at), pairs);
    }
}

#[async_trait]
impl ChainNode for MockChainNode {
    async fn last_block_number(&self) -> Result<u64, NodeError> {
        Ok(self.last_block)
    }

    async fn block_hash(&self, number: u64) -> Result<String, NodeError> {
        Ok(format!("0xhash{number}"))
    }

    async fn block_extrinsics(&self, number: u64) -> Result<Vec<RawExtrinsic>, NodeError> {
        if self.strict_head && number > self.last_block {
            return Err(NodeError::MissingBlock(number));
        }
        Ok(self.extrinsics.get(&number).cloned().unwrap_or_default())
    }

    async fn block_events(&self, number: u64) -> Result<Vec<ChainEvent>, NodeError> {
        if self.strict_head && number > self.last_block {
            return Err(NodeError::MissingBlock(number));
        }
        Ok(self.events.get(&number).cloned().unwrap_or_default())
    }

    async fn extrinsic_receipt(
        &self,
        block: u64,
        index: u32,
    ) -> Result<ExtrinsicReceipt, NodeError> {
        Ok(self.receipts.get(&(block, index)).cloned().unwrap_or_default())
    }

    async fn query(
        &self,
        pallet: &str,
        entry: &str,
        keys: &[Value],
        at: Option<&str>,
    ) -> Result<Option<Value>, NodeError> {
        Ok(self.storage.get(&storage_key(pallet, entry, keys, at)).cloned())
    }

    async fn query_map(
        &self,
        pallet: &str,
        entry: &str,
        _page_size: u32,
        at: Option<&str>,
    ) -> Result<Vec<(String, Value)>, NodeError> {
        Ok(self
            .maps
            .get(&storage_key(pallet, entry, &[], at))
            .cloned()
            .unwrap_or_default())
    }

    async fn constant(&self, pallet: &str, name: &str) -> Result<Value, NodeError> {
        self.constants
            .get(&format!("{pallet}.{name}"))
            .cloned()
            .ok_or_else(|| NodeError::Rpc(format!("constant {pallet}.{name} not found")))
    }

    async fn token_decimals(&self) -> Result<u32, NodeError> {
        Ok(self.decimals)
    }

    async fn token_symbol(&self) -> Result<String, NodeError> {
        Ok(self.symbol.clone())
    }
}

#[derive(Default)]
pub struct MockEvmNode {
    pub transactions: HashMap<(u64, u32), EvmTransaction>,
}

#[async_trait]
impl EvmNode for MockEvmNode {
    async fn transaction_by_index(
        &self,
        block: u64,
        index: u32,
    ) -> Result<Option<EvmTransaction>, NodeError> {
        Ok(self.transactions.get(&(block, index)).cloned())
    }
}
