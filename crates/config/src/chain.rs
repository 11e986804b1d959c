use crate::ConfigError;

/// A known chain with its connection endpoints.
///
/// Websocket endpoints are bare hosts; the node layer picks one at
/// random and prepends the `wss://` scheme. Ethereum RPC endpoints are
/// full URLs.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub id: &'static str,
    pub wss_endpoints: &'static [&'static str],
    pub eth_rpc_endpoints: &'static [&'static str],
    /// Average seconds between blocks, used for tailing and block math.
    pub block_duration: f64,
}

const CHAINS: &[ChainEndpoint] = &[
    ChainEndpoint {
        id: "moonbase",
        wss_endpoints: &[
            "wss.api.moonbase.moonbeam.network",
            "moonbeam-alpha.api.onfinality.io/public-ws",
        ],
        eth_rpc_endpoints: &["https://rpc.api.moonbase.moonbeam.network"],
        block_duration: 12.2,
    },
    ChainEndpoint {
        id: "moonbeam",
        wss_endpoints: &[
            "wss.api.moonbeam.network",
            "moonbeam.api.onfinality.io/public-ws",
        ],
        eth_rpc_endpoints: &["https://rpc.api.moonbeam.network"],
        block_duration: 12.2,
    },
    ChainEndpoint {
        id: "moonriver",
        wss_endpoints: &[
            "wss.moonriver.moonbeam.network",
            "moonbeam-rpc.dwellir.com",
            "moonriver.api.onfinality.io/public-ws",
        ],
        eth_rpc_endpoints: &["https://rpc.api.moonriver.moonbeam.network"],
        block_duration: 12.2,
    },
];

pub fn chain_ids() -> Vec<&'static str> {
    CHAINS.iter().map(|c| c.id).collect()
}

/// Look up a chain by id. An unknown id is a fatal configuration fault.
pub fn get_chain(chain_id: &str) -> Result<ChainEndpoint, ConfigError> {
    CHAINS
        .iter()
        .find(|c| c.id == chain_id)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownChain(chain_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_chains() {
        for id in ["moonbase", "moonbeam", "moonriver"] {
            let chain = get_chain(id).unwrap();
            assert_eq!(chain.id, id);
            assert!(!chain.wss_endpoints.is_empty());
            assert!(!chain.eth_rpc_endpoints.is_empty());
            assert!(chain.block_duration > 0.0);
        }
    }

    #[test]
    fn test_unknown_chain_is_an_error() {
        match get_chain("polkadot") {
            Err(ConfigError::UnknownChain(id)) => assert_eq!(id, "polkadot"),
            other => panic!("expected UnknownChain, got {:?}", other.map(|c| c.id)),
        }
    }

    #[test]
    fn test_chain_ids() {
        assert_eq!(chain_ids(), vec!["moonbase", "moonbeam", "moonriver"]);
    }
}
