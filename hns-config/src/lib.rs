//! Node configuration (spec.md §4.E ambient concerns): a TOML/env-layered
//! config the same way the teacher's `DxidConfig` loaded `DbConfig`/
//! `ApiConfig`/etc, trimmed to what a full node actually needs — no
//! database URL, no REST/gRPC addresses, no AI hypervisor key.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    pub enabled: bool,
    /// Hex-encoded 20-byte address hash the coinbase output pays to.
    /// Required when `enabled` is true.
    pub address_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: String,
    pub seed_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `"main"`, `"test"`, or `"regtest"` — picks both `NetworkParams` and
    /// `CuckooParams` (spec.md §6).
    pub network: String,
    pub data_dir: String,
    pub network_config: NetworkConfig,
    pub mining: MiningConfig,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("HNS").separator("__"));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn example() -> Self {
        NodeConfig {
            network: "regtest".into(),
            data_dir: "./hns-data".into(),
            network_config: NetworkConfig {
                listen_addr: "0.0.0.0:14038".into(),
                seed_nodes: vec![],
            },
            mining: MiningConfig {
                enabled: false,
                address_hash: None,
            },
        }
    }
}
