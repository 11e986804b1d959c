//! Chain-agnostic client: block scanning orchestration and the common
//! storage queries every chain supports. Chain-specific behavior is
//! plugged in through `ChainDialect`.

use crate::cache::ResultCache;
use crate::decode::{DecodeError, ExtrinsicDecoder, SubstrateDecoder};
use crate::extrinsic::Extrinsic;
use crate::node::{ChainNode, NodeError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

const IDENTITY_TTL: Duration = Duration::from_secs(3600);
const BALANCE_TTL: Duration = Duration::from_secs(60);
const ISSUANCE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// On-chain identity of an account, display name included when the
/// account registered one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
    pub display: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(display) => write!(f, "{display}"),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Shared scratch state for one scan batch. Memoizes lookups that
/// would otherwise repeat for every extrinsic in the batch.
#[derive(Default)]
pub struct ScanContext {
    pub candidate_pool: Option<Vec<crate::moonbeam::StakingCandidate>>,
}

/// Chain-specific decode policy and post-decode enrichment.
#[async_trait]
pub trait ChainDialect: Send + Sync {
    /// Whether an extrinsic of this pallet is worth decoding at all.
    fn should_decode(&self, pallet: &str, function: &str) -> bool {
        let _ = function;
        pallet == "Balances"
    }

    fn decoder_for(&self, pallet: &str, function: &str) -> &dyn ExtrinsicDecoder;

    /// Runs once per decoded extrinsic, after the decoder chain.
    async fn enrich(
        &self,
        chain: &ChainClient,
        extrinsic: &mut Extrinsic,
        context: &mut ScanContext,
    ) -> Result<(), ClientError> {
        let _ = context;
        humanize_amounts(chain, extrinsic).await
    }
}

/// Dialect with no chain-specific behavior: base decoding of balance
/// transfers only.
#[derive(Default)]
pub struct DefaultDialect {
    decoder: SubstrateDecoder,
}

#[async_trait]
impl ChainDialect for DefaultDialect {
    fn decoder_for(&self, _pallet: &str, _function: &str) -> &dyn ExtrinsicDecoder {
        &self.decoder
    }
}

/// Rewrite every amount param from raw plancks to token units.
pub(crate) async fn humanize_amounts(
    chain: &ChainClient,
    extrinsic: &mut Extrinsic,
) -> Result<(), ClientError> {
    let decimals = chain.decimals().await?;
    for param in extrinsic.params.iter_mut().filter(|p| p.is_amount()) {
        let raw: f64 = param.value.parse().unwrap_or(0.0);
        param.value = humanize(raw, decimals).to_string();
    }
    Ok(())
}

pub(crate) fn humanize(raw: f64, decimals: u32) -> f64 {
    raw / 10f64.powi(decimals as i32)
}

pub(crate) fn json_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub struct ChainClient {
    node: Arc<dyn ChainNode>,
    cache: ResultCache,
    chain_id: String,
    block_duration: f64,
    decimals: OnceCell<u32>,
    symbol: OnceCell<String>,
}

impl ChainClient {
    pub fn new(
        node: Arc<dyn ChainNode>,
        cache: ResultCache,
        chain_id: impl Into<String>,
        block_duration: f64,
    ) -> Self {
        Self {
            node,
            cache,
            chain_id: chain_id.into(),
            block_duration,
            decimals: OnceCell::new(),
            symbol: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.chain_id
    }

    pub fn block_duration(&self) -> f64 {
        self.block_duration
    }

    pub fn node(&self) -> &Arc<dyn ChainNode> {
        &self.node
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn last_block_number(&self) -> Result<u64, ClientError> {
        Ok(self.node.last_block_number().await?)
    }

    pub async fn decimals(&self) -> Result<u32, ClientError> {
        self.decimals
            .get_or_try_init(|| async { Ok(self.node.token_decimals().await?) })
            .await
            .copied()
    }

    pub async fn symbol(&self) -> Result<String, ClientError> {
        self.symbol
            .get_or_try_init(|| async { Ok(self.node.token_symbol().await?) })
            .await
            .cloned()
    }

    pub async fn token_humanize(&self, raw: f64) -> Result<f64, ClientError> {
        Ok(humanize(raw, self.decimals().await?))
    }

    pub async fn token_dehumanize(&self, value: f64) -> Result<u128, ClientError> {
        let decimals = self.decimals().await?;
        Ok((value * 10f64.powi(decimals as i32)) as u128)
    }

    /// Identity lookup is tolerant: any shape surprise degrades to an
    /// identity without a display name.
    pub async fn get_identity(&self, address: &str) -> Result<Identity, ClientError> {
        let key = ResultCache::derive_key("identity", &[address]);
        self.cache
            .get_or_put(&key, Some(IDENTITY_TTL), false, || async {
                let result = self
                    .node
                    .query("Identity", "IdentityOf", &[json!(address)], None)
                    .await?;
                Ok::<_, ClientError>(Identity {
                    address: address.to_string(),
                    display: result.as_ref().and_then(decode_display),
                })
            })
            .await
    }

    pub async fn get_free_balance(
        &self,
        address: &str,
        skip_cache: bool,
    ) -> Result<f64, ClientError> {
        let key = ResultCache::derive_key("free_balance", &[address]);
        self.cache
            .get_or_put(&key, Some(BALANCE_TTL), skip_cache, || async {
                let account = self
                    .node
                    .query("System", "Account", &[json!(address)], None)
                    .await?
                    .unwrap_or(Value::Null);
                let data = account.get("data").cloned().unwrap_or(Value::Null);
                let free = data.get("free").map(json_to_f64).unwrap_or(0.0);
                // older runtimes split the frozen balance
                let frozen = data
                    .get("frozen")
                    .or_else(|| data.get("misc_frozen"))
                    .map(json_to_f64)
                    .unwrap_or(0.0);
                self.token_humanize(free - frozen).await
            })
            .await
    }

    pub async fn total_issuance(&self) -> Result<f64, ClientError> {
        let key = ResultCache::derive_key("total_issuance", &[self.id()]);
        self.cache
            .get_or_put(&key, Some(ISSUANCE_TTL), false, || async {
                let raw = self
                    .node
                    .query("Balances", "TotalIssuance", &[], None)
                    .await?
                    .map(|v| json_to_f64(&v))
                    .unwrap_or(0.0);
                self.token_humanize(raw).await
            })
            .await
    }

    /// Scan a block range and return every decoded extrinsic.
    ///
    /// `start_block` past the chain head clamps to the head; an
    /// `end_block` before `start_block` does too. Failed extrinsics
    /// are skipped. With `use_cache` each block's decoded batch is
    /// cached indefinitely, blocks being immutable once finalized.
    pub async fn get_extrinsics(
        &self,
        dialect: &dyn ChainDialect,
        start_block: Option<u64>,
        end_block: Option<u64>,
        use_cache: bool,
    ) -> Result<Vec<Extrinsic>, ClientError> {
        let last = self.last_block_number().await?;
        let start = start_block.filter(|b| *b <= last).unwrap_or(last);
        let end = end_block
            .filter(|b| *b >= start)
            .map(|b| b.min(last))
            .unwrap_or(last);
        let mut result = Vec::new();
        let mut context = ScanContext::default();
        for block in start..=end {
            let key = format!("extrinsics_{}_{block}", self.chain_id);
            if use_cache {
                if let Some(cached) = self.cache.get::<Vec<Extrinsic>>(&key) {
                    result.extend(cached);
                    continue;
                }
            }
            let mut batch = Vec::new();
            for raw in self.node.block_extrinsics(block).await? {
                if !dialect.should_decode(&raw.pallet, &raw.function) {
                    continue;
                }
                let receipt = self.node.extrinsic_receipt(block, raw.index).await?;
                if let Some(error) = &receipt.error_message {
                    debug!("skipping failed extrinsic {}: {error}", raw.id());
                    continue;
                }
                let decoder = dialect.decoder_for(&raw.pallet, &raw.function);
                for mut extrinsic in decoder.decode(&raw, &receipt.events).await? {
                    dialect.enrich(self, &mut extrinsic, &mut context).await?;
                    batch.push(extrinsic);
                }
            }
            if use_cache {
                self.cache.set(&key, &batch, None, None);
            }
            result.extend(batch);
        }
        Ok(result)
    }
}

fn decode_display(value: &Value) -> Option<String> {
    // IdentityOf is either the registration or a (registration, extra)
    // pair depending on runtime version.
    let registration = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let display = registration.get("info")?.get("display")?;
    let raw = match display {
        Value::String(s) => return Some(s.clone()),
        Value::Object(map) => map
            .iter()
            .find(|(k, _)| k.starts_with("Raw"))
            .map(|(_, v)| v)?,
        _ => return None,
    };
    match raw {
        Value::String(s) if s.starts_with("0x") => hex::decode(s.trim_start_matches("0x"))
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok()),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let bytes = items
                .iter()
                .map(|b| b.as_u64().map(|b| b as u8))
                .collect::<Option<Vec<_>>>()?;
            String::from_utf8(bytes).ok()
        }
        _ => None,
    }
}
