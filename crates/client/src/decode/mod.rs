//! Extrinsic decoders. The base decoder turns a raw extrinsic into the
//! normalized model; chain-specific decoders expand that into zero or
//! more extrinsics (an EVM wrapper unpacked, reward events fanned out).

pub mod evm;
pub mod rewards;

use crate::extrinsic::{Extrinsic, ExtrinsicKind, Param};
use crate::node::{ChainEvent, NodeError, RawExtrinsic};
use async_trait::async_trait;
use heck::ToUpperCamelCase;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Node(#[from] NodeError),
}

#[async_trait]
pub trait ExtrinsicDecoder: Send + Sync {
    fn kind(&self) -> ExtrinsicKind {
        ExtrinsicKind::Substrate
    }

    /// Expand the base extrinsic into the decoder's final output. The
    /// default keeps it as-is; overrides may replace it or drop it by
    /// returning an empty vector.
    async fn expand(
        &self,
        extrinsic: Extrinsic,
        raw: &RawExtrinsic,
        events: &[ChainEvent],
    ) -> Result<Vec<Extrinsic>, DecodeError> {
        let _ = (raw, events);
        Ok(vec![extrinsic])
    }

    async fn decode(
        &self,
        raw: &RawExtrinsic,
        events: &[ChainEvent],
    ) -> Result<Vec<Extrinsic>, DecodeError> {
        let extrinsic = build_base(self.kind(), raw);
        self.expand(extrinsic, raw, events).await
    }
}

/// Base decoder used for plain Substrate pallets.
#[derive(Default)]
pub struct SubstrateDecoder;

#[async_trait]
impl ExtrinsicDecoder for SubstrateDecoder {}

/// `delegator_bond_more` and `delegatorBondMore` both become
/// `DelegatorBondMore`.
pub(crate) fn pascal_case(name: &str) -> String {
    name.to_upper_camel_case()
}

pub(crate) fn json_param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_base(kind: ExtrinsicKind, raw: &RawExtrinsic) -> Extrinsic {
    let mut extrinsic = Extrinsic::new(
        raw.block,
        raw.index,
        raw.pallet.clone(),
        pascal_case(&raw.function),
        kind,
    );
    if let Some(signer) = &raw.signer {
        extrinsic.push(Param::address("from", signer));
    }
    for arg in &raw.args {
        let value = json_param_value(&arg.value);
        let numeric = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
        if matches!(arg.type_name.as_str(), "Balance" | "BalanceOf") && numeric {
            extrinsic.push(Param::amount(arg.name.clone(), value));
        } else if arg.type_name == "LookupSource" || value.starts_with("0x") {
            extrinsic.push(Param::address(arg.name.clone(), value));
        } else {
            extrinsic.push(Param::generic(arg.name.clone(), value));
        }
    }
    extrinsic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RawArg;
    use serde_json::json;

    fn raw_transfer() -> RawExtrinsic {
        RawExtrinsic {
            block: 500,
            index: 3,
            pallet: "Balances".to_string(),
            function: "transfer_keep_alive".to_string(),
            signer: Some("0x44236223aB4291b93EEd10E4B511B37a398DEE55".to_string()),
            args: vec![
                RawArg {
                    name: "dest".to_string(),
                    type_name: "AccountId20".to_string(),
                    value: json!("0x3Cd0A705a2DC65e5b1E1205896BaA2be8A07c6e0"),
                },
                RawArg {
                    name: "value".to_string(),
                    type_name: "Balance".to_string(),
                    value: json!("5000000000000000000"),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_base_decode_of_a_transfer() {
        let decoded = SubstrateDecoder.decode(&raw_transfer(), &[]).await.unwrap();
        assert_eq!(decoded.len(), 1);
        let ex = &decoded[0];
        assert_eq!(ex.id, "500-3");
        assert_eq!(ex.method(), "Balances.TransferKeepAlive");
        assert_eq!(ex.kind, ExtrinsicKind::Substrate);

        // signer first, then args in order
        assert_eq!(ex.params[0].name, "from");
        assert!(ex.params[0].is_address());
        assert!(ex.params[1].is_address());
        assert!(ex.params[2].is_amount());
        assert_eq!(ex.amount(), 5000000000000000000.0);
    }

    #[tokio::test]
    async fn test_unsigned_extrinsic_has_no_from() {
        let mut raw = raw_transfer();
        raw.signer = None;
        let decoded = SubstrateDecoder.decode(&raw, &[]).await.unwrap();
        assert!(decoded[0].param("from").is_none());
    }

    #[tokio::test]
    async fn test_non_numeric_balance_stays_generic() {
        let mut raw = raw_transfer();
        raw.args[1].value = json!("not-a-number");
        let decoded = SubstrateDecoder.decode(&raw, &[]).await.unwrap();
        assert_eq!(decoded[0].amount(), 0.0);
    }

    #[tokio::test]
    async fn test_lookup_source_is_an_address() {
        let mut raw = raw_transfer();
        raw.args[0].type_name = "LookupSource".to_string();
        raw.args[0].value = json!("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY");
        let decoded = SubstrateDecoder.decode(&raw, &[]).await.unwrap();
        assert!(decoded[0].params[1].is_address());
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("transfer"), "Transfer");
        assert_eq!(pascal_case("schedule_revoke_delegation"), "ScheduleRevokeDelegation");
        assert_eq!(pascal_case("delegatorBondMore"), "DelegatorBondMore");
    }
}
