//! Ethereum-RPC view of the chain plus ABI call decoding helpers.

use super::{EvmNode, EvmTransaction, NodeError};
use alloy::core::dyn_abi::{DynSolType, DynSolValue};
use alloy::core::json_abi::JsonAbi;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

pub struct HttpEvmNode {
    url: String,
    http: reqwest::Client,
}

impl HttpEvmNode {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn send_raw_request(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        if let Some(error) = payload.get("error") {
            return Err(NodeError::Rpc(format!("{method} failed: {error}")));
        }
        Ok(payload
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl EvmNode for HttpEvmNode {
    async fn transaction_by_index(
        &self,
        block: u64,
        index: u32,
    ) -> Result<Option<EvmTransaction>, NodeError> {
        let params = json!([format!("0x{block:x}"), format!("0x{index:x}")]);
        let result = self
            .send_raw_request("eth_getTransactionByBlockNumberAndIndex", params)
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let input = result
            .get("input")
            .and_then(Value::as_str)
            .map(|s| hex::decode(s.trim_start_matches("0x")))
            .transpose()
            .map_err(|e| NodeError::Decode(format!("bad transaction input: {e}")))?
            .unwrap_or_default();
        let transaction_index = result
            .get("transactionIndex")
            .and_then(Value::as_str)
            .and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(index);
        Ok(Some(EvmTransaction {
            from: result
                .get("from")
                .and_then(Value::as_str)
                .map(str::to_owned),
            to: result.get("to").and_then(Value::as_str).map(str::to_owned),
            input,
            transaction_index,
        }))
    }
}

/// A contract call recovered from transaction input data.
#[derive(Debug)]
pub struct DecodedCall {
    /// Function name as declared in the ABI, e.g. `delegatorBondMore`.
    pub function: String,
    pub args: Vec<(String, String)>,
}

/// Match the input's 4-byte selector against the ABI's functions and
/// decode the argument blob. `None` when the input is too short, no
/// function matches, or the blob does not decode.
pub fn decode_call_input(abi: &JsonAbi, input: &[u8]) -> Option<DecodedCall> {
    if input.len() < 4 {
        return None;
    }
    let selector = &input[..4];
    let function = abi
        .functions()
        .find(|f| f.selector().as_slice() == selector)?;
    let types: Vec<DynSolType> = function
        .inputs
        .iter()
        .map(|param| param.selector_type().parse::<DynSolType>())
        .collect::<Result<_, _>>()
        .ok()?;
    let decoded = match DynSolType::Tuple(types).abi_decode_params(&input[4..]) {
        Ok(DynSolValue::Tuple(values)) => values,
        Ok(single) => vec![single],
        Err(e) => {
            debug!("unable to decode input for {}: {e}", function.name);
            return None;
        }
    };
    let args = function
        .inputs
        .iter()
        .enumerate()
        .zip(decoded.iter())
        .map(|((i, param), value)| {
            let name = if param.name.is_empty() {
                i.to_string()
            } else {
                param.name.clone()
            };
            (name, format_sol_value(value))
        })
        .collect();
    Some(DecodedCall {
        function: function.name.clone(),
        args,
    })
}

fn format_sol_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(addr) => format!("0x{addr:x}"),
        DynSolValue::FixedBytes(bytes, _) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::Int(num, _) => num.to_string(),
        DynSolValue::Uint(num, _) => num.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            format!(
                "[{}]",
                items
                    .iter()
                    .map(format_sol_value)
                    .collect::<Vec<_>>()
                    .join(",")
            )
        }
        DynSolValue::Tuple(items) => {
            format!(
                "({})",
                items
                    .iter()
                    .map(format_sol_value)
                    .collect::<Vec<_>>()
                    .join(",")
            )
        }
        DynSolValue::Function(selector) => format!("0x{}", hex::encode(selector)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::core::json_abi::Function;
    use alloy::core::primitives::{Address, U256};

    const TRANSFER_ABI: &str = r#"[{
        "type": "function",
        "name": "transfer",
        "inputs": [
            {"name": "to", "type": "address"},
            {"name": "value", "type": "uint256"}
        ],
        "outputs": [{"name": "", "type": "bool"}],
        "stateMutability": "nonpayable"
    }]"#;

    fn transfer_input(to: Address, value: u64) -> Vec<u8> {
        let function = Function::parse("transfer(address to, uint256 value)").unwrap();
        let args = DynSolValue::Tuple(vec![
            DynSolValue::Address(to),
            DynSolValue::Uint(U256::from(value), 256),
        ]);
        let mut input = function.selector().to_vec();
        input.extend(args.abi_encode_params());
        input
    }

    #[test]
    fn test_decode_call_input() {
        let abi: JsonAbi = serde_json::from_str(TRANSFER_ABI).unwrap();
        let to = Address::repeat_byte(0x42);
        let input = transfer_input(to, 1234);

        let call = decode_call_input(&abi, &input).unwrap();
        assert_eq!(call.function, "transfer");
        assert_eq!(call.args[0], ("to".to_string(), format!("0x{to:x}")));
        assert_eq!(call.args[1], ("value".to_string(), "1234".to_string()));
    }

    #[test]
    fn test_unknown_selector_is_none() {
        let abi: JsonAbi = serde_json::from_str(TRANSFER_ABI).unwrap();
        assert!(decode_call_input(&abi, &[0xde, 0xad, 0xbe, 0xef, 0x00]).is_none());
        assert!(decode_call_input(&abi, &[0x01]).is_none());
    }
}
