//! Endpoint registry — the static list of RPC endpoints to probe.
//!
//! The registry source is a JSON object keyed by chain name, each value an
//! ordered array of `{name, target}` node descriptors:
//!
//! ```json
//! {
//!   "eth": [{ "name": "public", "target": "https://eth.example" }],
//!   "base": [{ "name": "primary", "target": "https://base.example" }]
//! }
//! ```
//!
//! Malformed entries are dropped rather than rejected; only a registry with
//! no usable node at all is an error. Chain and node order follow the
//! source document and define the order of every sweep.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// One probed RPC endpoint. Identity is `(chain, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub chain: String,
    pub name: String,
    /// RPC URL the probe is sent to.
    pub target: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.name)
    }
}

/// Validated, ordered set of endpoints grouped by chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    chains: Vec<(String, Vec<Endpoint>)>,
}

impl Registry {
    /// Parse and validate a registry from a JSON string.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        if raw.trim().is_empty() {
            return Err(ConfigError::MissingRegistry);
        }
        let value: Value = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            what: "endpoint registry",
            reason: e.to_string(),
        })?;
        Self::from_value(&value)
    }

    /// Validate an already-decoded registry document.
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        let Value::Object(map) = value else {
            return Err(ConfigError::Parse {
                what: "endpoint registry",
                reason: "expected an object keyed by chain name".to_string(),
            });
        };

        let chains: Vec<(String, Vec<Endpoint>)> = map
            .iter()
            .filter_map(|(chain, nodes)| {
                let Some(nodes) = nodes.as_array() else {
                    warn!(%chain, "registry chain is not a list, skipping");
                    return None;
                };
                let endpoints: Vec<Endpoint> = nodes
                    .iter()
                    .filter_map(|node| {
                        let endpoint = parse_node(chain, node);
                        if endpoint.is_none() {
                            warn!(%chain, %node, "malformed registry node, skipping");
                        }
                        endpoint
                    })
                    .collect();
                (!endpoints.is_empty()).then(|| (chain.clone(), endpoints))
            })
            .collect();

        if chains.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        Ok(Self { chains })
    }

    /// Chains in registry order, each with its endpoints in registry order.
    pub fn chains(&self) -> impl Iterator<Item = (&str, &[Endpoint])> {
        self.chains
            .iter()
            .map(|(chain, endpoints)| (chain.as_str(), endpoints.as_slice()))
    }

    /// Every endpoint, chain by chain, in registry order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.chains.iter().flat_map(|(_, endpoints)| endpoints.iter())
    }

    /// Total number of endpoints.
    pub fn len(&self) -> usize {
        self.chains.iter().map(|(_, endpoints)| endpoints.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// A node is kept only if it has string `name` and `target` fields.
/// `rpc` is accepted as an alias for `target`.
fn parse_node(chain: &str, node: &Value) -> Option<Endpoint> {
    let name = node.get("name")?.as_str()?;
    let target = node
        .get("target")
        .or_else(|| node.get("rpc"))?
        .as_str()?;
    Some(Endpoint {
        chain: chain.to_string(),
        name: name.to_string(),
        target: target.to_string(),
    })
}
