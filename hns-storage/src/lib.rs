//! Chain and UTXO/name-state persistence. The teacher's `PgStore` backed
//! everything with Postgres + pgvector; this workspace has no embedding
//! search and no database service to assume, so blocks are kept as one
//! JSON file per height (mirroring `hns-wallet`'s per-wallet file store)
//! and the UTXO/name sets live in memory behind the same `CoinView`/
//! `NameView` seams the consensus engine and miner already use.

use anyhow::Result;
use async_trait::async_trait;
use hns_chain::{Coin, CoinView, Hash, NameHash, NameState, Outpoint};
use hns_consensus::NameView;
use hns_miner::Block;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Any backing-store failure (spec.md §7): the caller's handler aborts
/// atomically on this and the tip is not advanced.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o failure reading or writing chain data: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored block data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[async_trait]
pub trait ChainStore: Send + Sync {
    /// The caller (the node's chain-apply loop) always knows the height a
    /// block connects at, so it's supplied explicitly rather than derived
    /// from the header — the fixed header carries no height field.
    async fn insert_block(&self, height: u32, block: &Block) -> Result<(), StorageError>;
    async fn get_block_by_height(&self, height: u32) -> Result<Option<Block>, StorageError>;
    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StorageError>;
    async fn tip_height(&self) -> Result<Option<u32>, StorageError>;
}

/// One JSON file per block under `root/blocks/<height>.json`, plus an
/// in-memory `hash -> height` index rebuilt from disk at startup.
pub struct FileChainStore {
    root: PathBuf,
    index: RwLock<HashMap<Hash, u32>>,
}

impl FileChainStore {
    pub async fn open(root: PathBuf) -> Result<Self> {
        let blocks_dir = root.join("blocks");
        tokio::fs::create_dir_all(&blocks_dir).await?;
        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&blocks_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(height) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let bytes = tokio::fs::read(entry.path()).await?;
            let block: Block = serde_json::from_slice(&bytes)?;
            index.insert(block_hash(&block), height);
        }
        debug!(blocks = index.len(), "loaded chain store index");
        Ok(FileChainStore {
            root,
            index: RwLock::new(index),
        })
    }

    fn block_path(&self, height: u32) -> PathBuf {
        self.root.join("blocks").join(format!("{height}.json"))
    }
}

fn block_hash(block: &Block) -> Hash {
    Hash::digest(&block.header.encode_prefix())
}

#[async_trait]
impl ChainStore for FileChainStore {
    async fn insert_block(&self, height: u32, block: &Block) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(block)?;
        tokio::fs::write(self.block_path(height), bytes).await?;
        self.index.write().insert(block_hash(block), height);
        debug!(height, "persisted block");
        Ok(())
    }

    async fn get_block_by_height(&self, height: u32) -> Result<Option<Block>, StorageError> {
        let path = self.block_path(height);
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        let height = self.index.read().get(hash).copied();
        match height {
            Some(h) => self.get_block_by_height(h).await,
            None => Ok(None),
        }
    }

    async fn tip_height(&self) -> Result<Option<u32>, StorageError> {
        Ok(self.index.read().values().copied().max())
    }
}

/// The confirmed UTXO set, mutated incrementally by connecting/
/// disconnecting blocks (spec.md §4.A/§4.C never recompute it wholesale).
#[derive(Debug, Default)]
pub struct UtxoSet {
    coins: HashMap<Outpoint, Coin>,
}

impl UtxoSet {
    pub fn new() -> Self {
        UtxoSet::default()
    }

    pub fn insert(&mut self, outpoint: Outpoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    pub fn remove(&mut self, outpoint: &Outpoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl CoinView for UtxoSet {
    fn get_coin(&self, outpoint: &Outpoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }
}

/// The confirmed name-state tree, mutated by the `NameDelta`s the covenant
/// engine returns from `hns_consensus::process`.
#[derive(Debug, Default)]
pub struct NameSet {
    names: HashMap<NameHash, NameState>,
}

impl NameSet {
    pub fn new() -> Self {
        NameSet::default()
    }

    pub fn upsert(&mut self, state: NameState) {
        self.names.insert(state.name_hash, state);
    }

    pub fn remove(&mut self, hash: &NameHash) -> Option<NameState> {
        self.names.remove(hash)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl NameView for NameSet {
    fn get_name(&self, name_hash: &NameHash) -> Option<&NameState> {
        self.names.get(name_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hns_chain::{Amount, BlockHeader, Covenant};

    fn sample_block(height: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 0,
                prev_block: Hash::digest(format!("prev{height}").as_bytes()),
                merkle_root: Hash::ZERO,
                witness_root: Hash::ZERO,
                tree_root: Hash::ZERO,
                reserved_root: Hash::ZERO,
                time: height as u64,
                bits: 0x207f_ffff,
                extra_nonce: [0u8; 20],
                solution: vec![],
            },
            txs: vec![],
        }
    }

    #[tokio::test]
    async fn round_trips_a_block_through_disk() {
        let dir = std::env::temp_dir().join(format!("hns-storage-test-{}", std::process::id()));
        let store = FileChainStore::open(dir).await.unwrap();
        let block = sample_block(7);
        store.insert_block(7, &block).await.unwrap();

        let loaded = store.get_block_by_height(7).await.unwrap().unwrap();
        assert_eq!(loaded.header.time, 7);
        assert_eq!(store.tip_height().await.unwrap(), Some(7));

        let hash = block_hash(&block);
        let by_hash = store.get_block_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(by_hash.header.time, 7);
    }

    #[test]
    fn utxo_set_tracks_coins_by_outpoint() {
        let mut utxo = UtxoSet::new();
        let outpoint = Outpoint::new(Hash::digest(b"tx"), 0);
        utxo.insert(
            outpoint,
            Coin {
                value: Amount::from_base_units(1_000).unwrap(),
                address: vec![1, 2, 3],
                covenant: Covenant::none(),
                height: 5,
                coinbase: false,
            },
        );
        assert_eq!(utxo.len(), 1);
        assert!(utxo.get_coin(&outpoint).is_some());
        utxo.remove(&outpoint);
        assert!(utxo.is_empty());
    }
}
