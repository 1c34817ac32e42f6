//! Node glue: wires the chain store, in-memory UTXO/name views, the
//! Brontide peer network, and the CPU miner together (spec.md §4).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use hns_chain::{Coin, Hash, NetworkParams, Outpoint};
use hns_config::NodeConfig;
use hns_miner::{commit, find_nonce, verify_cuckoo, CuckooParams, Job, Template};
use hns_net::{BrontideNetwork, NetworkConfig as P2pConfig, NetworkService, WireMessage};
use hns_storage::{ChainStore, FileChainStore, NameSet, UtxoSet};
use parking_lot::RwLock;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub async fn run_node(config_path: PathBuf) -> Result<()> {
    let cfg = NodeConfig::load(&config_path)?;
    init_logging();
    info!(network = %cfg.network, config = ?config_path, "starting hns node");

    let params = network_params(&cfg.network)?;
    let cuckoo_params = cuckoo_params(&cfg.network);

    let data_dir = PathBuf::from(&cfg.data_dir);
    let store = Arc::new(FileChainStore::open(data_dir.join("chain")).await?);
    let utxo = Arc::new(RwLock::new(UtxoSet::new()));
    let names = Arc::new(RwLock::new(NameSet::new()));

    let network = Arc::new(BrontideNetwork::new(P2pConfig {
        listen_addr: cfg.network_config.listen_addr.clone(),
        seed_nodes: cfg.network_config.seed_nodes.clone(),
    }));
    network.start().await?;

    let mut inbound = network.subscribe();
    let relay_store = store.clone();
    let relay_utxo = utxo.clone();
    let relay_names = names.clone();
    let relay_task = tokio::spawn(async move {
        while let Ok(message) = inbound.recv().await {
            if let WireMessage::Block(block) = message {
                if let Err(err) = apply_block(
                    &relay_store,
                    &relay_utxo,
                    &relay_names,
                    &block,
                    params,
                    cuckoo_params,
                )
                .await
                {
                    warn!("rejected inbound block: {err}");
                }
            }
        }
    });

    let mining_task = if cfg.mining.enabled {
        let address_hash = cfg
            .mining
            .address_hash
            .as_ref()
            .ok_or_else(|| anyhow!("mining.enabled requires mining.address_hash"))?;
        let address = hex::decode(address_hash)?;
        let store = store.clone();
        let utxo = utxo.clone();
        let names = names.clone();
        let network = network.clone();
        Some(tokio::spawn(async move {
            mining_loop(store, utxo, names, network, address, params, cuckoo_params).await
        }))
    } else {
        None
    };

    relay_task.await?;
    if let Some(task) = mining_task {
        task.await??;
    }
    Ok(())
}

fn network_params(network: &str) -> Result<NetworkParams> {
    match network {
        "main" => Ok(NetworkParams::mainnet()),
        "test" => Ok(NetworkParams::testnet()),
        "regtest" => Ok(NetworkParams::regtest()),
        other => Err(anyhow!("unknown network {other:?}, expected main/test/regtest")),
    }
}

fn cuckoo_params(network: &str) -> CuckooParams {
    match network {
        "regtest" => CuckooParams::regtest(),
        _ => CuckooParams::mainnet(),
    }
}

/// Connects one block: checks it against consensus rules (coinbase shape,
/// merkle/witness roots, txStart gating, proof-of-work), runs the covenant
/// engine over every non-coinbase tx, folds the resulting `NameState`s and
/// spent/created coins into the in-memory views, and persists the block.
/// No reorg handling — the node only ever extends its current tip.
async fn apply_block(
    store: &FileChainStore,
    utxo: &RwLock<UtxoSet>,
    names: &RwLock<NameSet>,
    block: &hns_miner::Block,
    params: NetworkParams,
    cuckoo_params: CuckooParams,
) -> Result<()> {
    let height = store.tip_height().await?.map_or(0, |h| h + 1);

    let prehash = block.header.pre_hash();
    let solution_valid = verify_cuckoo(prehash.as_bytes(), &block.header.solution, &cuckoo_params).is_ok();
    hns_consensus::validate_block(&block.header, &block.txs, height, &params, solution_valid)
        .map_err(|err| anyhow!("block failed consensus validation: {err}"))?;

    for tx in &block.txs {
        if tx.is_coinbase() {
            continue;
        }
        let fresh = {
            let utxo_guard = utxo.read();
            let names_guard = names.read();
            let (_, fresh) = hns_consensus::process(tx, &*utxo_guard, &*names_guard, height, &params)
                .map_err(|e| anyhow!("covenant rejected: {e}"))?;
            fresh
        };
        {
            let mut utxo_guard = utxo.write();
            for input in &tx.inputs {
                utxo_guard.remove(&input.prevout);
            }
        }

        {
            let mut names_guard = names.write();
            for (_, state) in fresh {
                names_guard.upsert(state);
            }
        }
    }

    {
        let mut utxo_guard = utxo.write();
        for tx in &block.txs {
            let txid = tx.txid();
            for (index, output) in tx.outputs.iter().enumerate() {
                utxo_guard.insert(
                    Outpoint::new(txid, index as u32),
                    Coin {
                        value: output.value,
                        address: output.address.clone(),
                        covenant: output.covenant.clone(),
                        height,
                        coinbase: tx.is_coinbase(),
                    },
                );
            }
        }
    }

    store.insert_block(height, block).await?;
    info!(height, txs = block.txs.len(), "applied block");
    Ok(())
}

/// Builds a template against the current tip, mines it on a blocking
/// thread so the async runtime isn't starved, and broadcasts whatever it
/// finds. Runs forever; a stale/exhausted search just rebuilds and retries.
async fn mining_loop(
    store: Arc<FileChainStore>,
    utxo: Arc<RwLock<UtxoSet>>,
    names: Arc<RwLock<NameSet>>,
    network: Arc<BrontideNetwork>,
    address: Vec<u8>,
    params: NetworkParams,
    cuckoo_params: CuckooParams,
) -> Result<()> {
    loop {
        let tip_height = store.tip_height().await?;
        let height = tip_height.map_or(0, |h| h + 1);
        let prev_block = match tip_height {
            Some(h) => store
                .get_block_by_height(h)
                .await?
                .map(|b| Hash::digest(&b.header.encode_prefix()))
                .unwrap_or(Hash::ZERO),
            None => Hash::ZERO,
        };
        let time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let template = Template::create(
            height,
            prev_block,
            0x207f_ffff,
            time,
            Hash::ZERO,
            address.clone(),
            &params,
        );
        let mut job = Job::new(template);
        let cuckoo_params_copy = cuckoo_params;
        let (job, solution) = tokio::task::spawn_blocking(move || {
            let solution = find_nonce(&mut job, 0x207f_ffff, 50_000, &cuckoo_params_copy);
            (job, solution)
        })
        .await?;

        if let Some(solution) = solution {
            let block = commit(&job, solution);
            apply_block(&store, &utxo, &names, &block, params, cuckoo_params).await?;
            network.broadcast_block(block).await?;
        }
    }
}

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
