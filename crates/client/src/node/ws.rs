//! subxt-backed `ChainNode` over a pool of websocket endpoints.
//!
//! The connection is created lazily and shared. When a call fails with
//! a transport fault the connection is dropped, the node backs off and
//! reconnects to a (possibly different) endpoint, and the call is
//! retried up to `MAX_RETRIES` times. Non-transient faults propagate
//! immediately.

use super::{ChainEvent, ChainNode, ExtrinsicReceipt, NodeError, RawArg, RawExtrinsic};
use async_trait::async_trait;
use rand::Rng;
use scale_value::{Composite, Primitive, Value as ScaleValue, ValueDef};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::legacy::rpc_methods::NumberOrHex;
use subxt::backend::rpc::RpcClient;
use subxt::utils::H256;
use subxt::{OnlineClient, SubstrateConfig};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;

struct Connected {
    client: OnlineClient<SubstrateConfig>,
    rpc: LegacyRpcMethods<SubstrateConfig>,
}

pub struct WsNode {
    /// Bare websocket hosts, without the `wss://` scheme.
    endpoints: Vec<String>,
    connection: Mutex<Option<Arc<Connected>>>,
}

impl WsNode {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            connection: Mutex::new(None),
        }
    }

    fn random_url(&self) -> String {
        let index = rand::rng().random_range(0..self.endpoints.len());
        format!("wss://{}", self.endpoints[index])
    }

    async fn connection(&self) -> Result<Arc<Connected>, NodeError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let url = self.random_url();
        debug!("connecting to {url}");
        let rpc_client = RpcClient::from_url(&url)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let client = OnlineClient::<SubstrateConfig>::from_rpc_client(rpc_client.clone())
            .await
            .map_err(map_subxt_err)?;
        let conn = Arc::new(Connected {
            client,
            rpc: LegacyRpcMethods::new(rpc_client),
        });
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn disconnect(&self) {
        *self.connection.lock().await = None;
    }

    async fn retrying<T, F, Fut>(&self, op: F) -> Result<T, NodeError>
    where
        F: Fn(Arc<Connected>) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let mut attempt = 0;
        loop {
            let fault = match self.connection().await {
                Ok(conn) => match op(conn).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_transient() => e,
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };
            if attempt >= MAX_RETRIES {
                return Err(fault);
            }
            attempt += 1;
            warn!(
                "endpoint disconnected ({fault}), retrying in {}s",
                RECONNECT_BACKOFF.as_secs()
            );
            self.disconnect().await;
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }
}

#[async_trait]
impl ChainNode for WsNode {
    async fn last_block_number(&self) -> Result<u64, NodeError> {
        self.retrying(|conn| async move {
            let head = conn
                .rpc
                .chain_get_finalized_head()
                .await
                .map_err(map_subxt_err)?;
            let header = conn
                .rpc
                .chain_get_header(Some(head))
                .await
                .map_err(map_subxt_err)?
                .ok_or_else(|| NodeError::Rpc("finalized head has no header".to_string()))?;
            Ok(header.number as u64)
        })
        .await
    }

    async fn block_hash(&self, number: u64) -> Result<String, NodeError> {
        self.retrying(|conn| async move {
            let hash = conn
                .rpc
                .chain_get_block_hash(Some(NumberOrHex::Number(number)))
                .await
                .map_err(map_subxt_err)?
                .ok_or(NodeError::MissingBlock(number))?;
            Ok(format!("0x{}", hex::encode(hash.0)))
        })
        .await
    }

    async fn block_extrinsics(&self, number: u64) -> Result<Vec<RawExtrinsic>, NodeError> {
        self.retrying(|conn| async move {
            let hash = block_hash_at(&conn, number).await?;
            let block = conn.client.blocks().at(hash).await.map_err(map_subxt_err)?;
            let extrinsics = block.extrinsics().await.map_err(map_subxt_err)?;
            let metadata = conn.client.metadata();
            let mut out = Vec::new();
            for (index, ext) in extrinsics.iter().enumerate() {
                let pallet = match ext.pallet_name() {
                    Ok(name) => name.to_string(),
                    Err(e) => {
                        debug!("skipping undecodable extrinsic {number}-{index}: {e}");
                        continue;
                    }
                };
                let function = match ext.variant_name() {
                    Ok(name) => name.to_string(),
                    Err(e) => {
                        debug!("skipping undecodable extrinsic {number}-{index}: {e}");
                        continue;
                    }
                };
                let signer = ext.address_bytes().map(signer_hex);
                let type_names = call_type_names(&metadata, &pallet, &function);
                let args = match ext.field_values() {
                    Ok(composite) => composite_args(&composite, &type_names),
                    Err(e) => {
                        debug!("unable to decode args of {number}-{index}: {e}");
                        Vec::new()
                    }
                };
                out.push(RawExtrinsic {
                    block: number,
                    index: index as u32,
                    pallet,
                    function,
                    signer,
                    args,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn block_events(&self, number: u64) -> Result<Vec<ChainEvent>, NodeError> {
        self.retrying(|conn| async move {
            let hash = block_hash_at(&conn, number).await?;
            let block = conn.client.blocks().at(hash).await.map_err(map_subxt_err)?;
            let events = block.events().await.map_err(map_subxt_err)?;
            let mut out = Vec::new();
            for event in events.iter() {
                match event {
                    Ok(ev) => {
                        let fields = ev
                            .field_values()
                            .map(|composite| composite_fields(&composite))
                            .unwrap_or_default();
                        out.push(ChainEvent {
                            pallet: ev.pallet_name().to_string(),
                            name: ev.variant_name().to_string(),
                            fields,
                        });
                    }
                    Err(e) => debug!("skipping undecodable event in block {number}: {e}"),
                }
            }
            Ok(out)
        })
        .await
    }

    async fn extrinsic_receipt(
        &self,
        block: u64,
        index: u32,
    ) -> Result<ExtrinsicReceipt, NodeError> {
        self.retrying(|conn| async move {
            let hash = block_hash_at(&conn, block).await?;
            let at = conn.client.blocks().at(hash).await.map_err(map_subxt_err)?;
            let extrinsics = at.extrinsics().await.map_err(map_subxt_err)?;
            let ext = extrinsics
                .iter()
                .nth(index as usize)
                .ok_or_else(|| NodeError::Rpc(format!("extrinsic {block}-{index} not found")))?;
            let events = ext.events().await.map_err(map_subxt_err)?;
            let mut receipt = ExtrinsicReceipt::default();
            for event in events.iter() {
                let ev = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        debug!("skipping undecodable event of {block}-{index}: {e}");
                        continue;
                    }
                };
                let fields = ev
                    .field_values()
                    .map(|composite| composite_fields(&composite))
                    .unwrap_or_default();
                if ev.pallet_name() == "System" && ev.variant_name() == "ExtrinsicFailed" {
                    receipt.error_message = Some(
                        serde_json::to_string(&fields)
                            .unwrap_or_else(|_| "ExtrinsicFailed".to_string()),
                    );
                }
                receipt.events.push(ChainEvent {
                    pallet: ev.pallet_name().to_string(),
                    name: ev.variant_name().to_string(),
                    fields,
                });
            }
            Ok(receipt)
        })
        .await
    }

    async fn query(
        &self,
        pallet: &str,
        entry: &str,
        keys: &[Value],
        at: Option<&str>,
    ) -> Result<Option<Value>, NodeError> {
        self.retrying(|conn| async move {
            let storage = match at {
                Some(hash) => conn.client.storage().at(parse_hash(hash)?),
                None => conn
                    .client
                    .storage()
                    .at_latest()
                    .await
                    .map_err(map_subxt_err)?,
            };
            let keys = keys.iter().map(json_to_scale).collect::<Vec<_>>();
            let addr = subxt::dynamic::storage(pallet, entry, keys);
            let thunk = storage.fetch(&addr).await.map_err(map_subxt_err)?;
            match thunk {
                Some(thunk) => {
                    let value = thunk.to_value().map_err(map_subxt_err)?;
                    Ok(Some(value_to_json(&value)))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn query_map(
        &self,
        pallet: &str,
        entry: &str,
        // subxt pages the underlying iteration on its own.
        _page_size: u32,
        at: Option<&str>,
    ) -> Result<Vec<(String, Value)>, NodeError> {
        self.retrying(|conn| async move {
            let storage = match at {
                Some(hash) => conn.client.storage().at(parse_hash(hash)?),
                None => conn
                    .client
                    .storage()
                    .at_latest()
                    .await
                    .map_err(map_subxt_err)?,
            };
            let addr = subxt::dynamic::storage(pallet, entry, Vec::<ScaleValue<()>>::new());
            let mut iter = storage.iter(addr).await.map_err(map_subxt_err)?;
            let mut out = Vec::new();
            while let Some(pair) = iter.next().await {
                let pair = pair.map_err(map_subxt_err)?;
                let value = pair.value.to_value().map_err(map_subxt_err)?;
                out.push((map_key_hex(&pair.key_bytes), value_to_json(&value)));
            }
            Ok(out)
        })
        .await
    }

    async fn constant(&self, pallet: &str, name: &str) -> Result<Value, NodeError> {
        self.retrying(|conn| async move {
            let addr = subxt::dynamic::constant(pallet, name);
            let thunk = conn.client.constants().at(&addr).map_err(map_subxt_err)?;
            let value = thunk.to_value().map_err(map_subxt_err)?;
            Ok(value_to_json(&value))
        })
        .await
    }

    async fn token_decimals(&self) -> Result<u32, NodeError> {
        self.retrying(|conn| async move {
            let props = conn.rpc.system_properties().await.map_err(map_subxt_err)?;
            props
                .get("tokenDecimals")
                .and_then(first_property)
                .and_then(Value::as_u64)
                .map(|d| d as u32)
                .ok_or_else(|| NodeError::Rpc("chain reports no tokenDecimals".to_string()))
        })
        .await
    }

    async fn token_symbol(&self) -> Result<String, NodeError> {
        self.retrying(|conn| async move {
            let props = conn.rpc.system_properties().await.map_err(map_subxt_err)?;
            props
                .get("tokenSymbol")
                .and_then(first_property)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| NodeError::Rpc("chain reports no tokenSymbol".to_string()))
        })
        .await
    }
}

async fn block_hash_at(conn: &Connected, number: u64) -> Result<H256, NodeError> {
    conn.rpc
        .chain_get_block_hash(Some(NumberOrHex::Number(number)))
        .await
        .map_err(map_subxt_err)?
        .ok_or(NodeError::MissingBlock(number))
}

// Generic because the rpc methods and value decoding surface their own
// error types; everything converges on `subxt::Error` for classification.
fn map_subxt_err(e: impl Into<subxt::Error>) -> NodeError {
    let e = e.into();
    match &e {
        // Broken sockets and garbled frames surface through these two.
        subxt::Error::Rpc(_) | subxt::Error::Serialization(_) => {
            NodeError::Transport(e.to_string())
        }
        _ => NodeError::Rpc(e.to_string()),
    }
}

fn parse_hash(hash: &str) -> Result<H256, NodeError> {
    let bytes = hex::decode(hash.trim_start_matches("0x"))
        .map_err(|e| NodeError::Decode(format!("bad block hash {hash}: {e}")))?;
    if bytes.len() != 32 {
        return Err(NodeError::Decode(format!("bad block hash length {hash}")));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(H256::from(out))
}

/// Chains keyed by AccountId20 sign with the bare account bytes, while
/// AccountId32 chains wrap them in `MultiAddress::Id` (a leading zero
/// tag byte).
fn signer_hex(bytes: &[u8]) -> String {
    let account = match bytes.len() {
        33 if bytes[0] == 0 => &bytes[1..],
        _ => bytes,
    };
    format!("0x{}", hex::encode(account))
}

/// Trailing bytes of a map key, hex-encoded. Assumes Twox64Concat
/// hashing: twox128(pallet) ++ twox128(entry) ++ twox64(key) ++ key.
fn map_key_hex(key_bytes: &[u8]) -> String {
    let tail = key_bytes.get(40..).unwrap_or_default();
    format!("0x{}", hex::encode(tail))
}

/// Short form of a declared type name from metadata: generics and path
/// segments stripped, so `T::Balance` and `BalanceOf<T>` become
/// `Balance` and `BalanceOf`.
fn short_type_name(raw: &str) -> String {
    let base = raw.split('<').next().unwrap_or(raw);
    base.rsplit("::").next().unwrap_or(base).trim().to_string()
}

fn call_type_names(
    metadata: &subxt::Metadata,
    pallet: &str,
    call: &str,
) -> HashMap<String, String> {
    let Some(variant) = metadata
        .pallet_by_name(pallet)
        .and_then(|p| p.call_variant_by_name(call))
    else {
        return HashMap::new();
    };
    variant
        .fields
        .iter()
        .filter_map(|field| {
            let name = field.name.clone()?;
            let type_name = field.type_name.as_deref().map(short_type_name)?;
            Some((name, type_name))
        })
        .collect()
}

fn composite_args<T>(
    composite: &Composite<T>,
    type_names: &HashMap<String, String>,
) -> Vec<RawArg> {
    match composite {
        Composite::Named(fields) => fields
            .iter()
            .map(|(name, value)| RawArg {
                name: name.clone(),
                type_name: type_names.get(name).cloned().unwrap_or_default(),
                value: value_to_json(value),
            })
            .collect(),
        Composite::Unnamed(values) => values
            .iter()
            .enumerate()
            .map(|(i, value)| RawArg {
                name: i.to_string(),
                type_name: String::new(),
                value: value_to_json(value),
            })
            .collect(),
    }
}

fn composite_fields<T>(composite: &Composite<T>) -> Vec<Value> {
    match composite {
        Composite::Named(fields) => fields.iter().map(|(_, v)| value_to_json(v)).collect(),
        Composite::Unnamed(values) => values.iter().map(value_to_json).collect(),
    }
}

// =============================================================================
// SCALE value to JSON conversion
// =============================================================================

fn value_to_json<T>(value: &ScaleValue<T>) -> Value {
    value_def_to_json(&value.value)
}

fn value_def_to_json<T>(value: &ValueDef<T>) -> Value {
    match value {
        ValueDef::Composite(composite) => composite_to_json(composite),
        ValueDef::Variant(variant) => {
            let inner = composite_to_json(&variant.values);
            // Options and MultiAddress::Id unwrap to their payload.
            match variant.name.as_str() {
                "None" => Value::Null,
                "Some" | "Id" => match inner {
                    Value::Array(mut items) if items.len() == 1 => items.remove(0),
                    other => other,
                },
                name if variant.values.is_empty() => Value::String(name.to_string()),
                name => {
                    let mut map = serde_json::Map::new();
                    map.insert(name.to_string(), inner);
                    Value::Object(map)
                }
            }
        }
        ValueDef::Primitive(primitive) => primitive_to_json(primitive),
        ValueDef::BitSequence(bits) => Value::String(format!("{bits:?}")),
    }
}

fn composite_to_json<T>(composite: &Composite<T>) -> Value {
    match composite {
        Composite::Unnamed(values) => {
            // Byte arrays (AccountId20, AccountId32, hashes) read better
            // as hex than as arrays of numbers.
            if let Some(hex_str) = try_as_byte_array(values) {
                return Value::String(hex_str);
            }
            if values.len() == 1 {
                return value_to_json(&values[0]);
            }
            Value::Array(values.iter().map(value_to_json).collect())
        }
        Composite::Named(fields) => {
            let map: serde_json::Map<String, Value> = fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect();
            Value::Object(map)
        }
    }
}

fn try_as_byte_array<T>(values: &[ScaleValue<T>]) -> Option<String> {
    let len = values.len();
    if len != 20 && len != 32 && len != 64 {
        return None;
    }
    let mut bytes = Vec::with_capacity(len);
    for value in values {
        match &value.value {
            ValueDef::Primitive(Primitive::U128(n)) if *n <= 255 => bytes.push(*n as u8),
            _ => return None,
        }
    }
    Some(format!("0x{}", hex::encode(bytes)))
}

fn primitive_to_json(primitive: &Primitive) -> Value {
    match primitive {
        Primitive::Bool(b) => Value::Bool(*b),
        Primitive::Char(c) => Value::String(c.to_string()),
        Primitive::String(s) => Value::String(s.clone()),
        // Balances overflow u64, so large values fall back to strings.
        Primitive::U128(n) => match u64::try_from(*n) {
            Ok(small) => Value::Number(small.into()),
            Err(_) => Value::String(n.to_string()),
        },
        Primitive::I128(n) => match i64::try_from(*n) {
            Ok(small) => Value::Number(small.into()),
            Err(_) => Value::String(n.to_string()),
        },
        Primitive::U256(bytes) | Primitive::I256(bytes) => {
            Value::String(format!("0x{}", hex::encode(bytes)))
        }
    }
}

fn first_property(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn json_to_scale(value: &Value) -> ScaleValue<()> {
    match value {
        Value::String(s) if s.starts_with("0x") => match hex::decode(s.trim_start_matches("0x")) {
            Ok(bytes) => ScaleValue::from_bytes(bytes),
            Err(_) => ScaleValue::string(s.clone()),
        },
        Value::String(s) => ScaleValue::string(s.clone()),
        Value::Number(n) => ScaleValue::u128(n.as_u64().unwrap_or_default() as u128),
        Value::Bool(b) => ScaleValue::bool(*b),
        other => ScaleValue::string(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_errors_are_not_transient() {
        let err = map_subxt_err(subxt::Error::Other("boom".to_string()));
        assert!(matches!(err, NodeError::Rpc(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("Balance"), "Balance");
        assert_eq!(short_type_name("T::Balance"), "Balance");
        assert_eq!(short_type_name("BalanceOf<T>"), "BalanceOf");
        assert_eq!(short_type_name("Vec<u8>"), "Vec");
    }

    #[test]
    fn test_signer_hex_handles_bare_and_wrapped_accounts() {
        let account20 = [0x11u8; 20];
        assert_eq!(signer_hex(&account20), format!("0x{}", "11".repeat(20)));

        let mut wrapped = vec![0u8];
        wrapped.extend([0x22u8; 32]);
        assert_eq!(signer_hex(&wrapped), format!("0x{}", "22".repeat(32)));
    }

    #[test]
    fn test_map_key_hex_takes_the_trailing_account() {
        let mut key = vec![0u8; 40];
        key.extend([0xabu8; 20]);
        assert_eq!(map_key_hex(&key), format!("0x{}", "ab".repeat(20)));
        assert_eq!(map_key_hex(&[1, 2, 3]), "0x");
    }

    #[test]
    fn test_byte_arrays_render_as_hex() {
        let values: Vec<ScaleValue<()>> =
            (0..20).map(|_| ScaleValue::u128(0xaa)).collect();
        let composite = Composite::Unnamed(values);
        assert_eq!(
            composite_to_json(&composite),
            Value::String(format!("0x{}", "aa".repeat(20)))
        );
    }

    #[test]
    fn test_variants_unwrap_options() {
        let some: ScaleValue<()> = ScaleValue::variant(
            "Some",
            Composite::Unnamed(vec![ScaleValue::u128(7)]),
        );
        assert_eq!(value_to_json(&some), Value::Number(7u64.into()));

        let none: ScaleValue<()> = ScaleValue::variant("None", Composite::Unnamed(vec![]));
        assert_eq!(value_to_json(&none), Value::Null);

        let unit: ScaleValue<()> = ScaleValue::variant("Active", Composite::Unnamed(vec![]));
        assert_eq!(value_to_json(&unit), Value::String("Active".to_string()));
    }

    #[test]
    fn test_large_numbers_fall_back_to_strings() {
        let big = u128::from(u64::MAX) + 1;
        assert_eq!(
            primitive_to_json(&Primitive::U128(big)),
            Value::String(big.to_string())
        );
        assert_eq!(
            primitive_to_json(&Primitive::U128(42)),
            Value::Number(42u64.into())
        );
    }
}
