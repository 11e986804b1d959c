//! Decoder that expands a block-validation inherent into one extrinsic
//! per staking reward paid in that block.
//!
//! The inherent itself carries nothing of interest; the rewards live in
//! the block's events. The first rewarded account in a block is the
//! collator, and later payouts to other accounts get a `collator`
//! param attributing them.

use super::{DecodeError, ExtrinsicDecoder, json_param_value};
use crate::extrinsic::{Extrinsic, Param};
use crate::node::{ChainEvent, ChainNode, RawExtrinsic};
use async_trait::async_trait;
use std::sync::Arc;

const REWARD_EVENTS: &[(&str, &str)] = &[
    ("MoonbeamOrbiters", "OrbiterRewarded"),
    ("ParachainStaking", "Rewarded"),
];

pub struct RewardsDecoder {
    node: Arc<dyn ChainNode>,
}

impl RewardsDecoder {
    pub fn new(node: Arc<dyn ChainNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl ExtrinsicDecoder for RewardsDecoder {
    async fn expand(
        &self,
        extrinsic: Extrinsic,
        _raw: &RawExtrinsic,
        _events: &[ChainEvent],
    ) -> Result<Vec<Extrinsic>, DecodeError> {
        let events = self.node.block_events(extrinsic.block).await?;
        let mut collator: Option<String> = None;
        let mut result = Vec::new();
        for event in events {
            if !REWARD_EVENTS
                .iter()
                .any(|(pallet, name)| event.pallet == *pallet && event.name == *name)
            {
                continue;
            }
            let Some(recipient) = event.fields.first().map(json_param_value) else {
                continue;
            };
            let amount = event.fields.get(1).map(json_param_value).unwrap_or_default();
            if collator.is_none() {
                collator = Some(recipient.clone());
            }
            let mut reward = Extrinsic::with_id(
                extrinsic.id.clone(),
                extrinsic.block,
                event.pallet,
                event.name,
                extrinsic.kind,
            );
            reward.push(Param::amount("amount", amount));
            reward.push(Param::address("address", &recipient));
            if collator.as_deref() != Some(recipient.as_str()) {
                if let Some(collator) = &collator {
                    reward.push(Param::address("collator", collator));
                }
            }
            result.push(reward);
        }
        Ok(result)
    }
}
