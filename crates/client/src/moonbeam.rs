//! Moonbeam-family specialization: staking read models, the decoder
//! lookup table and the post-decode enrichment of staking extrinsics.

use crate::cache::ResultCache;
use crate::client::{
    ChainClient, ChainDialect, ClientError, ScanContext, humanize_amounts, json_to_f64,
};
use crate::decode::evm::EvmDecoder;
use crate::decode::rewards::RewardsDecoder;
use crate::decode::{ExtrinsicDecoder, SubstrateDecoder};
use crate::extrinsic::{Extrinsic, Param};
use crate::node::EvmNode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CURRENT_TTL: Duration = Duration::from_secs(300);
const DELEGATIONS_TTL: Duration = Duration::from_secs(600);
const DELEGATOR_TTL: Duration = Duration::from_secs(3600);
const POOL_SIZE_TTL: Duration = Duration::from_secs(3600);

/// A staking round: a fixed-length window of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingRound {
    pub number: u64,
    pub first: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingCandidateDelegation {
    pub address: String,
    pub collator: String,
    /// Human token units.
    pub amount: f64,
    pub revoke_amount: f64,
    pub revoke_round: Option<u64>,
    pub revoke_action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingDelegator {
    pub address: String,
    pub delegations: Vec<StakingCandidateDelegation>,
}

impl StakingDelegator {
    pub fn total_delegated(&self) -> f64 {
        self.delegations.iter().map(|d| d.amount).sum()
    }

    pub fn total_revoked(&self) -> f64 {
        self.delegations.iter().map(|d| d.revoke_amount).sum()
    }

    pub fn delegation(&self, collator: &str) -> Option<&StakingCandidateDelegation> {
        self.delegations
            .iter()
            .find(|d| d.collator.eq_ignore_ascii_case(collator))
    }
}

/// A collator candidate with its position in the stake ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingCandidate {
    pub address: String,
    /// Counted backing stake in human token units.
    pub total_counted: f64,
    pub active: bool,
    pub selected: bool,
    /// 1-based, stake descending.
    pub rank: u32,
    /// Stake delta to the last selected candidate; zero when this is
    /// the last selected candidate itself.
    pub rank_last_selected_at: f64,
    pub rank_prev_at: f64,
    pub rank_next_at: f64,
    pub total_selected: usize,
    pub total_active: usize,
}

pub struct MoonbeamClient {
    chain: ChainClient,
    default_decoder: SubstrateDecoder,
    evm_decoder: EvmDecoder,
    rewards_decoder: RewardsDecoder,
}

impl MoonbeamClient {
    pub fn new(chain: ChainClient, evm: Arc<dyn EvmNode>, abi_dir: PathBuf) -> Self {
        let rewards_decoder = RewardsDecoder::new(chain.node().clone());
        Self {
            chain,
            default_decoder: SubstrateDecoder,
            evm_decoder: EvmDecoder::new(evm, abi_dir),
            rewards_decoder,
        }
    }

    pub fn chain(&self) -> &ChainClient {
        &self.chain
    }

    pub async fn get_extrinsics(
        &self,
        start_block: Option<u64>,
        end_block: Option<u64>,
        use_cache: bool,
    ) -> Result<Vec<Extrinsic>, ClientError> {
        self.chain
            .get_extrinsics(self, start_block, end_block, use_cache)
            .await
    }

    pub async fn last_round(&self) -> Result<StakingRound, ClientError> {
        let value = self
            .chain
            .node()
            .query("ParachainStaking", "Round", &[], None)
            .await?
            .unwrap_or(Value::Null);
        Ok(StakingRound {
            number: value.get("current").and_then(Value::as_u64).unwrap_or(0),
            first: value.get("first").and_then(Value::as_u64).unwrap_or(0),
            length: value.get("length").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// Annual yearly inflation, 5% of the total issuance.
    pub async fn total_inflation(&self) -> Result<f64, ClientError> {
        Ok(self.chain.total_issuance().await? * 0.05)
    }

    /// Rough per-token delegator APR: half the inflation spread over
    /// the stake backing the selected candidates.
    pub async fn staking_apr(&self) -> Result<f64, ClientError> {
        let pool = self.candidate_pool(0, false).await?;
        let total_staked: f64 = pool
            .iter()
            .filter(|c| c.selected)
            .map(|c| c.total_counted)
            .sum();
        Ok(1.0 / total_staked * self.total_inflation().await? / 2.0)
    }

    pub async fn delegation_bond_less_delay(&self) -> Result<u64, ClientError> {
        let value = self
            .chain
            .node()
            .constant("ParachainStaking", "DelegationBondLessDelay")
            .await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    pub async fn candidate_pool_size(&self) -> Result<u64, ClientError> {
        let key = ResultCache::derive_key("candidate_pool_size", &[self.chain.id()]);
        self.chain
            .cache()
            .get_or_put(&key, Some(POOL_SIZE_TTL), false, || async {
                let value = self
                    .chain
                    .node()
                    .query("ParachainStaking", "TotalSelected", &[], None)
                    .await?;
                Ok::<_, ClientError>(value.as_ref().and_then(Value::as_u64).unwrap_or(0))
            })
            .await
    }

    /// The candidate pool ranked by counted stake. `round_nr` zero
    /// means "now" (short cache TTL); a positive round pins the pool
    /// at the block that round ended at and caches it indefinitely.
    pub async fn candidate_pool(
        &self,
        round_nr: u64,
        skip_cache: bool,
    ) -> Result<Vec<StakingCandidate>, ClientError> {
        let key = ResultCache::derive_key("candidate_pool", &[&round_nr.to_string()]);
        let (ttl, at) = if round_nr > 0 {
            let round = self.last_round().await?;
            let last_block = self.chain.last_block_number().await?;
            let target = last_block - round.number.saturating_sub(round_nr) * round.length;
            (None, Some(self.chain.node().block_hash(target).await?))
        } else {
            (Some(CURRENT_TTL), None)
        };
        self.chain
            .cache()
            .get_or_put(&key, ttl, skip_cache, || async {
                info!("loading candidate pool (round {round_nr})");
                self.load_candidate_pool(at.as_deref()).await
            })
            .await
    }

    async fn load_candidate_pool(
        &self,
        at: Option<&str>,
    ) -> Result<Vec<StakingCandidate>, ClientError> {
        let node = self.chain.node();
        let info = node
            .query_map("ParachainStaking", "CandidateInfo", 250, at)
            .await?;
        let selected: HashSet<String> = node
            .query("ParachainStaking", "SelectedCandidates", &[], at)
            .await?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_lowercase)
            .collect();

        let mut pool: Vec<(String, f64, bool)> = info
            .into_iter()
            .map(|(address, value)| {
                let counted = value.get("total_counted").map(json_to_f64).unwrap_or(0.0);
                let active = value.get("status").map(is_active_status).unwrap_or(false);
                (address, counted, active)
            })
            .collect();
        pool.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let total_active = pool.len();
        let total_selected = selected.len();
        let last_selected = pool
            .get(total_selected.saturating_sub(1))
            .map(|c| c.1)
            .unwrap_or(0.0);
        let mut result = Vec::with_capacity(total_active);
        for (i, (address, counted, active)) in pool.iter().enumerate() {
            let prev = pool[i.saturating_sub(1)].1;
            let next = pool[(i + 1).min(total_active - 1)].1;
            result.push(StakingCandidate {
                address: address.clone(),
                total_counted: self.chain.token_humanize(*counted).await?,
                active: *active,
                selected: selected.contains(&address.to_lowercase()),
                rank: (i + 1) as u32,
                rank_last_selected_at: self.chain.token_humanize(counted - last_selected).await?,
                rank_prev_at: self.chain.token_humanize(counted - prev).await?,
                rank_next_at: self.chain.token_humanize(counted - next).await?,
                total_selected,
                total_active,
            });
        }
        Ok(result)
    }

    pub async fn get_candidate(
        &self,
        address: &str,
        round_nr: u64,
        skip_cache: bool,
    ) -> Result<Option<StakingCandidate>, ClientError> {
        let pool = self.candidate_pool(round_nr, skip_cache).await?;
        Ok(pool
            .into_iter()
            .find(|c| c.address.eq_ignore_ascii_case(address)))
    }

    /// Block points awarded to a candidate in a round, expressed as
    /// produced blocks (the runtime awards 20 points per block).
    pub async fn candidate_points(
        &self,
        address: &str,
        round_nr: u64,
    ) -> Result<f64, ClientError> {
        let last_round = self.last_round().await?;
        let (round_nr, ttl) = if round_nr > 0 {
            (round_nr, None)
        } else {
            (last_round.number, Some(CURRENT_TTL))
        };
        let key = ResultCache::derive_key("candidate_points", &[address, &round_nr.to_string()]);
        self.chain
            .cache()
            .get_or_put(&key, ttl, false, || async {
                let at = if round_nr < last_round.number {
                    let last_block = self.chain.last_block_number().await?;
                    let target =
                        last_block - last_round.length * (last_round.number - round_nr - 1);
                    Some(self.chain.node().block_hash(target).await?)
                } else {
                    None
                };
                let points = self
                    .chain
                    .node()
                    .query(
                        "ParachainStaking",
                        "AwardedPts",
                        &[json!(round_nr), json!(address)],
                        at.as_deref(),
                    )
                    .await?
                    .map(|v| json_to_f64(&v))
                    .unwrap_or(0.0);
                Ok::<_, ClientError>(points / 20.0)
            })
            .await
    }

    /// Top delegations backing one candidate.
    pub async fn candidate_delegations(
        &self,
        address: &str,
    ) -> Result<Vec<StakingCandidateDelegation>, ClientError> {
        let key = ResultCache::derive_key("candidate_delegations", &[address]);
        self.chain
            .cache()
            .get_or_put(&key, Some(DELEGATIONS_TTL), false, || async {
                let top = self
                    .chain
                    .node()
                    .query("ParachainStaking", "TopDelegations", &[json!(address)], None)
                    .await?
                    .and_then(|v| v.get("delegations").and_then(Value::as_array).cloned())
                    .unwrap_or_default();
                let mut out = Vec::with_capacity(top.len());
                for item in &top {
                    let Some(owner) = item.get("owner").and_then(Value::as_str) else {
                        continue;
                    };
                    out.push(StakingCandidateDelegation {
                        address: owner.to_string(),
                        collator: address.to_string(),
                        amount: self
                            .chain
                            .token_humanize(item.get("amount").map(json_to_f64).unwrap_or(0.0))
                            .await?,
                        revoke_amount: 0.0,
                        revoke_round: None,
                        revoke_action: None,
                    });
                }
                Ok::<_, ClientError>(out)
            })
            .await
    }

    /// Delegator state with scheduled revokes merged in. `None` when
    /// the account has no delegations (anymore). `block_nr` pins the
    /// lookup to a historical block, which also bypasses the cache.
    pub async fn delegator_state(
        &self,
        address: &str,
        block_nr: Option<u64>,
        skip_cache: bool,
    ) -> Result<Option<StakingDelegator>, ClientError> {
        if let Some(number) = block_nr {
            let at = self.chain.node().block_hash(number).await?;
            return self.load_delegator_state(address, Some(&at)).await;
        }
        let key = ResultCache::derive_key("delegator_state", &[address]);
        if !skip_cache {
            if let Some(hit) = self.chain.cache().get::<StakingDelegator>(&key) {
                return Ok(Some(hit));
            }
        }
        let state = self.load_delegator_state(address, None).await?;
        // A gone delegator is not cached: if the account delegates
        // again it shows up on the next lookup.
        if let Some(state) = &state {
            self.chain
                .cache()
                .set(&key, state, Some(DELEGATOR_TTL), None);
        }
        Ok(state)
    }

    /// Every delegator on the chain. Expensive, pages through the
    /// whole DelegatorState map.
    pub async fn delegator_state_list(&self) -> Result<Vec<StakingDelegator>, ClientError> {
        let records = self
            .chain
            .node()
            .query_map("ParachainStaking", "DelegatorState", 250, None)
            .await?;
        let mut out = Vec::with_capacity(records.len());
        for (_, value) in records {
            out.push(self.decode_delegator_state(&value, None).await?);
        }
        Ok(out)
    }

    pub async fn delegation_amount(
        &self,
        delegator: Option<&str>,
        collator: Option<&str>,
        block_nr: Option<u64>,
        skip_cache: bool,
    ) -> Result<f64, ClientError> {
        let (Some(delegator), Some(collator)) = (delegator, collator) else {
            return Ok(0.0);
        };
        let state = self.delegator_state(delegator, block_nr, skip_cache).await?;
        Ok(state
            .as_ref()
            .and_then(|s| s.delegation(collator))
            .map(|d| d.amount)
            .unwrap_or(0.0))
    }

    async fn load_delegator_state(
        &self,
        address: &str,
        at: Option<&str>,
    ) -> Result<Option<StakingDelegator>, ClientError> {
        let Some(data) = self
            .chain
            .node()
            .query("ParachainStaking", "DelegatorState", &[json!(address)], at)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(self.decode_delegator_state(&data, at).await?))
    }

    async fn decode_delegator_state(
        &self,
        data: &Value,
        at: Option<&str>,
    ) -> Result<StakingDelegator, ClientError> {
        let address = data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let raw = data
            .get("delegations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        // last write wins per collator
        let mut delegations: Vec<StakingCandidateDelegation> = Vec::new();
        for item in &raw {
            let Some(collator) = item.get("owner").and_then(Value::as_str) else {
                continue;
            };
            let mut delegation = StakingCandidateDelegation {
                address: address.clone(),
                collator: collator.to_string(),
                amount: self
                    .chain
                    .token_humanize(item.get("amount").map(json_to_f64).unwrap_or(0.0))
                    .await?,
                revoke_amount: 0.0,
                revoke_round: None,
                revoke_action: None,
            };
            for request in self.scheduled_requests(collator, at).await? {
                if request.get("delegator").and_then(Value::as_str) != Some(address.as_str()) {
                    continue;
                }
                if let Some((action, amount)) = request
                    .get("action")
                    .and_then(Value::as_object)
                    .and_then(|m| m.iter().next())
                {
                    delegation.revoke_round =
                        request.get("when_executable").and_then(Value::as_u64);
                    delegation.revoke_amount =
                        self.chain.token_humanize(json_to_f64(amount)).await?;
                    delegation.revoke_action = Some(action.clone());
                }
                break;
            }
            match delegations
                .iter_mut()
                .find(|d| d.collator == delegation.collator)
            {
                Some(existing) => *existing = delegation,
                None => delegations.push(delegation),
            }
        }
        Ok(StakingDelegator {
            address,
            delegations,
        })
    }

    /// Scheduled revoke/decrease requests against one collator. Read
    /// failures degrade to "no requests" so a broken storage entry
    /// cannot take a whole state reconstruction down.
    async fn scheduled_requests(
        &self,
        collator: &str,
        at: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let key = ResultCache::derive_key(
            "candidate_scheduled_requests",
            &[collator, at.unwrap_or("latest")],
        );
        self.chain
            .cache()
            .get_or_put(&key, Some(CURRENT_TTL), false, || async {
                let requests = match self
                    .chain
                    .node()
                    .query(
                        "ParachainStaking",
                        "DelegationScheduledRequests",
                        &[json!(collator)],
                        at,
                    )
                    .await
                {
                    Ok(value) => value.and_then(|v| v.as_array().cloned()).unwrap_or_default(),
                    Err(e) => {
                        warn!("unable to read scheduled requests for {collator}: {e}");
                        Vec::new()
                    }
                };
                Ok::<_, ClientError>(requests)
            })
            .await
    }
}

#[async_trait]
impl ChainDialect for MoonbeamClient {
    fn should_decode(&self, pallet: &str, _function: &str) -> bool {
        matches!(
            pallet,
            "Ethereum" | "ParachainStaking" | "ParachainSystem" | "Balances"
        )
    }

    fn decoder_for(&self, pallet: &str, _function: &str) -> &dyn ExtrinsicDecoder {
        match pallet {
            "Ethereum" => &self.evm_decoder,
            "ParachainSystem" => &self.rewards_decoder,
            _ => &self.default_decoder,
        }
    }

    async fn enrich(
        &self,
        chain: &ChainClient,
        extrinsic: &mut Extrinsic,
        context: &mut ScanContext,
    ) -> Result<(), ClientError> {
        humanize_amounts(chain, extrinsic).await?;
        let candidate_id = extrinsic.param("candidate").map(str::to_owned);

        // Revoke-flow extrinsics carry no amount of their own, so one
        // is synthesized from the delegation state. For the execute
        // step the record may already be gone, hence the lookup a few
        // blocks back, uncached.
        let amount = match extrinsic.function.as_str() {
            "ScheduleRevokeDelegation" => {
                let from = extrinsic.param("from").map(str::to_owned);
                self.delegation_amount(from.as_deref(), candidate_id.as_deref(), None, false)
                    .await?
            }
            "ExecuteDelegationRequest" => {
                let delegator = extrinsic.param("delegator").map(str::to_owned);
                self.delegation_amount(
                    delegator.as_deref(),
                    candidate_id.as_deref(),
                    Some(extrinsic.block.saturating_sub(5)),
                    true,
                )
                .await?
            }
            _ => 0.0,
        };
        if amount > 0.0 {
            extrinsic.push(Param::amount("amount", amount));
        }

        if let Some(candidate_id) = candidate_id {
            if context.candidate_pool.is_none() {
                context.candidate_pool = Some(self.candidate_pool(0, true).await?);
            }
            let candidate = context.candidate_pool.as_ref().and_then(|pool| {
                pool.iter()
                    .find(|c| c.address.eq_ignore_ascii_case(&candidate_id))
            });
            if let Some(candidate) = candidate {
                extrinsic.push(Param::amount("candidateBacking", candidate.total_counted));
                extrinsic.push(Param::generic(
                    "candidatePoolSize",
                    format!("{}/{}", candidate.total_selected, candidate.total_active),
                ));
                extrinsic.push(Param::generic(
                    "candidateRank",
                    format!(
                        "{} {}",
                        candidate.rank,
                        if candidate.selected { "selected" } else { "waiting" }
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn is_active_status(status: &Value) -> bool {
    match status {
        Value::String(s) => s == "Active",
        Value::Object(map) => map.contains_key("Active"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::{MockChainNode, MockEvmNode};
    use crate::node::{RawArg, RawExtrinsic};

    const COLLATOR_A: &str = "0x1111111111111111111111111111111111111111";
    const COLLATOR_B: &str = "0x2222222222222222222222222222222222222222";
    const COLLATOR_C: &str = "0x3333333333333333333333333333333333333333";
    const DELEGATOR: &str = "0x4444444444444444444444444444444444444444";

    fn candidate_info(counted: &str) -> Value {
        json!({"total_counted": counted, "status": "Active"})
    }

    fn pool_node() -> MockChainNode {
        let mut node = MockChainNode::new(1000);
        node.set_map(
            "ParachainStaking",
            "CandidateInfo",
            None,
            vec![
                (COLLATOR_C.to_string(), candidate_info("1000000000000000000000")),
                (COLLATOR_A.to_string(), candidate_info("3000000000000000000000")),
                (COLLATOR_B.to_string(), candidate_info("2000000000000000000000")),
            ],
        );
        node.set_storage(
            "ParachainStaking",
            "SelectedCandidates",
            &[],
            None,
            json!([COLLATOR_A, COLLATOR_B]),
        );
        node
    }

    fn moonbeam(node: MockChainNode) -> MoonbeamClient {
        let chain = ChainClient::new(
            Arc::new(node),
            ResultCache::disabled(),
            "testnet",
            12.2,
        );
        MoonbeamClient::new(chain, Arc::new(MockEvmNode::default()), PathBuf::from("abis"))
    }

    fn moonbeam_with_cache(node: MockChainNode, dir: &std::path::Path) -> MoonbeamClient {
        let chain = ChainClient::new(
            Arc::new(node),
            ResultCache::new(dir.to_path_buf()),
            "testnet",
            12.2,
        );
        MoonbeamClient::new(chain, Arc::new(MockEvmNode::default()), PathBuf::from("abis"))
    }

    #[tokio::test]
    async fn test_candidate_pool_ranking() {
        let client = moonbeam(pool_node());
        let pool = client.candidate_pool(0, false).await.unwrap();
        assert_eq!(pool.len(), 3);

        let first = &pool[0];
        assert_eq!(first.address, COLLATOR_A);
        assert_eq!(first.rank, 1);
        assert!(first.selected);
        assert_eq!(first.total_counted, 3000.0);
        assert_eq!(first.rank_last_selected_at, 1000.0);
        // rank 1 has no better neighbor
        assert_eq!(first.rank_prev_at, 0.0);
        assert_eq!(first.rank_next_at, 1000.0);

        // the last selected candidate sits exactly at the cutoff
        let second = &pool[1];
        assert_eq!(second.address, COLLATOR_B);
        assert!(second.selected);
        assert_eq!(second.rank_last_selected_at, 0.0);

        let third = &pool[2];
        assert_eq!(third.rank, 3);
        assert!(!third.selected);
        assert_eq!(third.rank_last_selected_at, -1000.0);
        assert_eq!(third.total_selected, 2);
        assert_eq!(third.total_active, 3);
    }

    #[tokio::test]
    async fn test_get_candidate_is_case_insensitive() {
        let client = moonbeam(pool_node());
        let candidate = client
            .get_candidate(&COLLATOR_A.to_uppercase().replace("0X", "0x"), 0, false)
            .await
            .unwrap();
        assert_eq!(candidate.unwrap().rank, 1);
        assert!(client.get_candidate("0x9999", 0, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delegator_state_merges_scheduled_revokes() {
        let mut node = MockChainNode::new(1000);
        node.set_storage(
            "ParachainStaking",
            "DelegatorState",
            &[json!(DELEGATOR)],
            None,
            json!({
                "id": DELEGATOR,
                "delegations": [
                    {"owner": COLLATOR_A, "amount": "5000000000000000000"},
                    {"owner": COLLATOR_B, "amount": "7000000000000000000"},
                ],
            }),
        );
        node.set_storage(
            "ParachainStaking",
            "DelegationScheduledRequests",
            &[json!(COLLATOR_A)],
            None,
            json!([
                {"delegator": "0x9999", "when_executable": 10, "action": {"Revoke": "1"}},
                {"delegator": DELEGATOR, "when_executable": 42,
                 "action": {"Revoke": "5000000000000000000"}},
            ]),
        );
        let client = moonbeam(node);

        let state = client
            .delegator_state(DELEGATOR, None, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.address, DELEGATOR);
        assert_eq!(state.total_delegated(), 12.0);
        assert_eq!(state.total_revoked(), 5.0);

        let revoked = state.delegation(COLLATOR_A).unwrap();
        assert_eq!(revoked.amount, 5.0);
        assert_eq!(revoked.revoke_amount, 5.0);
        assert_eq!(revoked.revoke_round, Some(42));
        assert_eq!(revoked.revoke_action.as_deref(), Some("Revoke"));

        let untouched = state.delegation(&COLLATOR_B.to_uppercase()).unwrap();
        assert_eq!(untouched.revoke_amount, 0.0);
        assert_eq!(untouched.revoke_round, None);
    }

    #[tokio::test]
    async fn test_delegator_state_none_when_gone() {
        let client = moonbeam(MockChainNode::new(1000));
        assert!(client
            .delegator_state(DELEGATOR, None, false)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            client
                .delegation_amount(Some(DELEGATOR), Some(COLLATOR_A), None, false)
                .await
                .unwrap(),
            0.0
        );
    }

    #[tokio::test]
    async fn test_gone_delegator_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let delegator_state = json!({
            "id": DELEGATOR,
            "delegations": [{"owner": COLLATOR_A, "amount": "5000000000000000000"}],
        });

        // the miss must not stick
        let client = moonbeam_with_cache(MockChainNode::new(1000), dir.path());
        assert!(client
            .delegator_state(DELEGATOR, None, false)
            .await
            .unwrap()
            .is_none());

        // the account delegates; the next lookup sees it immediately
        let mut node = MockChainNode::new(1000);
        node.set_storage(
            "ParachainStaking",
            "DelegatorState",
            &[json!(DELEGATOR)],
            None,
            delegator_state,
        );
        let client = moonbeam_with_cache(node, dir.path());
        let state = client.delegator_state(DELEGATOR, None, false).await.unwrap();
        assert_eq!(state.unwrap().total_delegated(), 5.0);

        // found states still cache as before
        let client = moonbeam_with_cache(MockChainNode::new(1000), dir.path());
        let cached = client.delegator_state(DELEGATOR, None, false).await.unwrap();
        assert_eq!(cached.unwrap().total_delegated(), 5.0);
    }

    #[tokio::test]
    async fn test_candidate_points_divided_by_award_unit() {
        let mut node = pool_node();
        node.set_storage(
            "ParachainStaking",
            "Round",
            &[],
            None,
            json!({"current": 10, "first": 900, "length": 100}),
        );
        node.set_storage(
            "ParachainStaking",
            "AwardedPts",
            &[json!(10), json!(COLLATOR_A)],
            None,
            json!(40),
        );
        let client = moonbeam(node);
        assert_eq!(client.candidate_points(COLLATOR_A, 0).await.unwrap(), 2.0);
        // a round with no storage entry scores zero
        assert_eq!(client.candidate_points(COLLATOR_B, 10).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_enrichment_attaches_candidate_context() {
        let mut node = pool_node();
        node.extrinsics.insert(
            1000,
            vec![RawExtrinsic {
                block: 1000,
                index: 0,
                pallet: "ParachainStaking".to_string(),
                function: "delegator_bond_more".to_string(),
                signer: Some(DELEGATOR.to_string()),
                args: vec![
                    RawArg {
                        name: "candidate".to_string(),
                        type_name: "AccountId20".to_string(),
                        value: json!(COLLATOR_A),
                    },
                    RawArg {
                        name: "more".to_string(),
                        type_name: "BalanceOf".to_string(),
                        value: json!("1000000000000000000"),
                    },
                ],
            }],
        );
        let client = moonbeam(node);

        let result = client
            .get_extrinsics(Some(1000), Some(1000), false)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        let ex = &result[0];
        assert_eq!(ex.method(), "ParachainStaking.DelegatorBondMore");
        assert_eq!(ex.amount(), 1.0);
        assert_eq!(ex.param("candidateBacking"), Some("3000"));
        assert_eq!(ex.param("candidatePoolSize"), Some("2/3"));
        assert_eq!(ex.param("candidateRank"), Some("1 selected"));
    }

    #[tokio::test]
    async fn test_schedule_revoke_gets_a_synthesized_amount() {
        let mut node = pool_node();
        node.set_storage(
            "ParachainStaking",
            "DelegatorState",
            &[json!(DELEGATOR)],
            None,
            json!({
                "id": DELEGATOR,
                "delegations": [{"owner": COLLATOR_A, "amount": "8000000000000000000"}],
            }),
        );
        node.extrinsics.insert(
            1000,
            vec![RawExtrinsic {
                block: 1000,
                index: 0,
                pallet: "ParachainStaking".to_string(),
                function: "schedule_revoke_delegation".to_string(),
                signer: Some(DELEGATOR.to_string()),
                args: vec![RawArg {
                    name: "candidate".to_string(),
                    type_name: "AccountId20".to_string(),
                    value: json!(COLLATOR_A),
                }],
            }],
        );
        let client = moonbeam(node);

        let result = client
            .get_extrinsics(Some(1000), Some(1000), false)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].function, "ScheduleRevokeDelegation");
        assert_eq!(result[0].param("amount"), Some("8"));
        assert_eq!(result[0].amount(), 8.0);
    }

    #[tokio::test]
    async fn test_should_decode_and_decoder_table() {
        let client = moonbeam(MockChainNode::new(1));
        assert!(client.should_decode("Ethereum", "transact"));
        assert!(client.should_decode("ParachainStaking", "delegate"));
        assert!(client.should_decode("ParachainSystem", "set_validation_data"));
        assert!(client.should_decode("Balances", "transfer"));
        assert!(!client.should_decode("System", "remark"));
    }
}
