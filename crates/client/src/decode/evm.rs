//! Decoder for EVM calls wrapped in `Ethereum.transact` extrinsics.
//!
//! The wrapped payload is opaque on the Substrate side, so the decoder
//! keeps a per-block counter of wrapper extrinsics seen so far and
//! fetches the matching Ethereum transaction by index. Input data is
//! then decoded against a small table of known precompile ABIs.

use super::{DecodeError, ExtrinsicDecoder, pascal_case};
use crate::extrinsic::{Extrinsic, ExtrinsicKind, Param};
use crate::node::evm::decode_call_input;
use crate::node::{ChainEvent, EvmNode, RawExtrinsic};
use alloy::core::json_abi::JsonAbi;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Contracts we can decode calls for, by lowercase address.
const ABI_NAMES: &[(&str, &str)] = &[
    ("0x0000000000000000000000000000000000000800", "ParachainStaking"),
    ("0x0000000000000000000000000000000000000802", "IERC20"),
];

const SUPPORTED_MODULES: &[&str] = &["Balances", "ParachainStaking"];
const DROPPED_FUNCTIONS: &[&str] = &["CancelDelegationRequest"];
const TRANSACT_WRAPPER: &str = "Transact";

/// Per-block transaction counters older than this many blocks are
/// pruned; a sequential scan never looks that far back.
const COUNTER_RETENTION_BLOCKS: u64 = 64;

fn is_evm_address(value: &str) -> bool {
    value.starts_with("0x") && value.len() == 42
}

pub struct EvmDecoder {
    evm: Arc<dyn EvmNode>,
    abi_dir: PathBuf,
    counters: Mutex<BTreeMap<u64, u32>>,
    abi_cache: Mutex<HashMap<String, Option<Arc<JsonAbi>>>>,
}

impl EvmDecoder {
    pub fn new(evm: Arc<dyn EvmNode>, abi_dir: PathBuf) -> Self {
        Self {
            evm,
            abi_dir,
            counters: Mutex::new(BTreeMap::new()),
            abi_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Index of the next wrapper extrinsic within `block`, starting at
    /// zero. Prunes counters that fell out of the retention window.
    fn next_transaction_index(&self, block: u64) -> u32 {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = block.saturating_sub(COUNTER_RETENTION_BLOCKS);
        counters.retain(|b, _| *b >= cutoff);
        let slot = counters.entry(block).or_insert(u32::MAX);
        *slot = slot.wrapping_add(1);
        *slot
    }

    fn load_abi(&self, contract_address: &str) -> Option<(String, Arc<JsonAbi>)> {
        let address = contract_address.to_lowercase();
        let name = ABI_NAMES
            .iter()
            .find(|(addr, _)| *addr == address)
            .map(|(_, name)| (*name).to_string())?;
        let mut cache = self
            .abi_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let abi = cache
            .entry(address)
            .or_insert_with(|| {
                let path = self.abi_dir.join(format!("{name}.json"));
                match std::fs::read_to_string(&path) {
                    Ok(raw) => match parse_abi(&raw) {
                        Some(abi) => Some(Arc::new(abi)),
                        None => {
                            warn!("invalid abi in {}", path.display());
                            None
                        }
                    },
                    Err(e) => {
                        warn!("unable to read abi from {}: {e}", path.display());
                        None
                    }
                }
            })
            .clone()?;
        Some((name, abi))
    }
}

/// ABI files are either a bare function array or wrapped in an object
/// under an `abi` key (the artifact format).
fn parse_abi(raw: &str) -> Option<JsonAbi> {
    if let Ok(abi) = serde_json::from_str::<JsonAbi>(raw) {
        return Some(abi);
    }
    let wrapped: serde_json::Value = serde_json::from_str(raw).ok()?;
    serde_json::from_value(wrapped.get("abi")?.clone()).ok()
}

#[async_trait]
impl ExtrinsicDecoder for EvmDecoder {
    fn kind(&self) -> ExtrinsicKind {
        ExtrinsicKind::Evm
    }

    async fn expand(
        &self,
        mut extrinsic: Extrinsic,
        _raw: &RawExtrinsic,
        _events: &[ChainEvent],
    ) -> Result<Vec<Extrinsic>, DecodeError> {
        if extrinsic.function != TRANSACT_WRAPPER {
            return Ok(vec![]);
        }
        let index = self.next_transaction_index(extrinsic.block);
        let transaction = match self.evm.transaction_by_index(extrinsic.block, index).await {
            Ok(Some(transaction)) => transaction,
            Ok(None) => return Ok(vec![]),
            Err(e) => {
                debug!("unable to fetch transaction {}:{index}: {e}", extrinsic.block);
                return Ok(vec![]);
            }
        };
        let Some(to) = transaction.to.as_deref() else {
            return Ok(vec![]);
        };
        let Some((module, abi)) = self.load_abi(to) else {
            return Ok(vec![]);
        };
        if let Some(from) = &transaction.from {
            extrinsic.push(Param::address("from", from));
        }
        let Some(call) = decode_call_input(&abi, &transaction.input) else {
            return Ok(vec![]);
        };
        extrinsic.module = module;
        extrinsic.function = pascal_case(&call.function);
        // Pruning runs after resolution so it sees the real call.
        if !SUPPORTED_MODULES.contains(&extrinsic.module.as_str()) {
            debug!("discarded EVM module: {}", extrinsic.module);
            return Ok(vec![]);
        }
        if DROPPED_FUNCTIONS.contains(&extrinsic.function.as_str()) {
            debug!("discarded EVM function: {}", extrinsic.function);
            return Ok(vec![]);
        }
        if extrinsic.module == "Balances" && extrinsic.function != "Transfer" {
            debug!("discarded EVM call: {}", extrinsic.method());
            return Ok(vec![]);
        }
        extrinsic.push(Param::generic(
            "evmTransactionIndex",
            transaction.transaction_index,
        ));
        extrinsic.remove_param("transaction");
        for (name, value) in call.args {
            let param = match name.as_str() {
                "amount" | "more" | "less" => Param::amount(name, value),
                _ if is_evm_address(&value) => Param::address(name, value),
                _ => Param::generic(name, value),
            };
            extrinsic.push(param);
        }
        Ok(vec![extrinsic])
    }
}
