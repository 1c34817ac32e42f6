//! Block template assembly (spec.md §4.B).
//!
//! The fixed header already carries its own 20-byte extra-nonce field
//! (`hns_chain::header::NONCE_POS`), so unlike the usual coinbase-embedded
//! extra-nonce scheme, mutating the nonce here never touches the coinbase
//! or the merkle trees — see DESIGN.md's open-question resolution. `refresh`
//! still rebuilds both trees whenever the included transaction set changes.

use hns_chain::{
    Amount, BlockHeader, Covenant, CovenantType, Hash, MerkleTree, NetworkParams, Outpoint,
    Transaction, TxInput, TxOutput,
};
use hns_consensus::{BlockCaps, NameView};
use hns_chain::CoinView;
use serde::{Deserialize, Serialize};

use crate::reward::base_reward;

/// Conservative stand-ins for the real network's weight/sigop ceilings —
/// this workspace has no script-interpreter sigop count, so `MAX_BLOCK_SIGOPS`
/// just bounds the number of included transactions.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;
pub const MAX_BLOCK_SIGOPS: u64 = 80_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub height: u32,
    pub prev_block: Hash,
    pub bits: u32,
    pub time: u64,
    pub tree_root: Hash,
    address: Vec<u8>,
    reward: Amount,
    weight: u64,
    caps: BlockCaps,
    txs: Vec<Transaction>,
    claim_outputs: Vec<TxOutput>,
    claim_witness: Vec<Vec<u8>>,
    merkle_root: Hash,
    witness_root: Hash,
}

impl Template {
    /// `create(tip, address, opts)`: base subsidy plus zero fees until
    /// `add_tx` accumulates some, coinbase skeleton, and the (empty) merkle
    /// trees built by the initial `refresh`.
    pub fn create(
        height: u32,
        prev_block: Hash,
        bits: u32,
        time: u64,
        tree_root: Hash,
        address: Vec<u8>,
        params: &NetworkParams,
    ) -> Self {
        let reward = base_reward(height, params.halving_interval);
        let mut tpl = Template {
            height,
            prev_block,
            bits,
            time,
            tree_root,
            address,
            reward,
            weight: 0,
            caps: BlockCaps::default(),
            txs: Vec::new(),
            claim_outputs: Vec::new(),
            claim_witness: Vec::new(),
            merkle_root: Hash::ZERO,
            witness_root: Hash::ZERO,
        };
        tpl.refresh();
        tpl
    }

    fn coinbase(&self) -> Transaction {
        let mut outputs = vec![TxOutput {
            value: self.reward,
            address: self.address.clone(),
            covenant: Covenant::none(),
        }];
        outputs.extend(self.claim_outputs.iter().cloned());
        Transaction {
            version: 0,
            inputs: vec![TxInput {
                prevout: Outpoint::new(Hash::ZERO, u32::MAX),
                sequence: 0,
                witness: {
                    let mut w = vec![self.height.to_le_bytes().to_vec()];
                    w.extend(self.claim_witness.iter().cloned());
                    w
                },
            }],
            outputs,
            locktime: 0,
        }
    }

    /// `addTX`/`pushTX`: runs the covenant engine, checks per-block caps and
    /// the weight ceiling, and only mutates the template on success.
    pub fn add_tx(
        &mut self,
        tx: Transaction,
        fee: Amount,
        coins: &dyn CoinView,
        names: &dyn NameView,
        params: &NetworkParams,
    ) -> bool {
        let weight = tx.encode_witness().len() as u64;
        if self.weight + weight > MAX_BLOCK_WEIGHT {
            return false;
        }
        if self.txs.len() as u64 + 1 > MAX_BLOCK_SIGOPS {
            return false;
        }
        let result = match hns_consensus::process(&tx, coins, names, self.height, params) {
            Ok((result, _fresh)) => result,
            Err(_) => return false,
        };
        let mut caps = self.caps.clone();
        if caps.admit(&result, params).is_err() {
            return false;
        }
        self.caps = caps;
        self.weight += weight;
        self.reward = self.reward.checked_add(fee).unwrap_or(self.reward);
        self.txs.push(tx);
        self.refresh();
        true
    }

    /// `addClaim(claim, data)`: appends a reserved-name claim to the
    /// coinbase witness and adds the CLAIM output it unlocks.
    pub fn add_claim(&mut self, claim_output: TxOutput, proof_data: Vec<u8>) {
        debug_assert_eq!(claim_output.covenant.ty, CovenantType::Claim);
        self.claim_outputs.push(claim_output);
        self.claim_witness.push(proof_data);
        self.refresh();
    }

    /// `refresh()`: rebuilds the coinbase and the canonical merkle trees.
    /// Leaf `i` of the witness tree is `BLAKE2b(tx[i].witnessHash)`.
    pub fn refresh(&mut self) {
        let coinbase = self.coinbase();
        let mut id_leaves = Vec::with_capacity(self.txs.len() + 1);
        let mut witness_leaves = Vec::with_capacity(self.txs.len() + 1);
        id_leaves.push(coinbase.txid());
        witness_leaves.push(coinbase.witness_hash());
        for tx in &self.txs {
            id_leaves.push(tx.txid());
            witness_leaves.push(tx.witness_hash());
        }
        self.merkle_root = MerkleTree::from_items(&id_leaves).root;
        self.witness_root = MerkleTree::from_items(&witness_leaves).root;
    }

    /// `getRoot(n1, n2)`: in the teacher's scheme this substitutes the
    /// coinbase's extra-nonce and recomputes the merkle root; here the
    /// extra-nonce lives directly in the fixed header (`NONCE_POS`) rather
    /// than inside any transaction, so it never perturbs either tree and
    /// this returns the already-current roots.
    pub fn get_root(&self, _n1: u64, _n2: u64) -> (Hash, Hash) {
        (self.merkle_root, self.witness_root)
    }

    /// `getProof(n1, n2, time, nonce, sol)`: assembles the full header for
    /// a candidate solution, packing `(n1, n2)` into the 20-byte extra-nonce.
    pub fn get_proof(&self, n1: u64, n2: u64, time: u64, solution: Vec<u32>) -> BlockHeader {
        BlockHeader {
            version: 0,
            prev_block: self.prev_block,
            merkle_root: self.merkle_root,
            witness_root: self.witness_root,
            tree_root: self.tree_root,
            reserved_root: Hash::ZERO,
            time,
            bits: self.bits,
            extra_nonce: extra_nonce_bytes(n1, n2),
            solution,
        }
    }

    /// `commit(proof) → Block`: pairs the solved header with the coinbase
    /// and every admitted transaction.
    pub fn commit(&self, header: BlockHeader) -> Block {
        let mut txs = vec![self.coinbase()];
        txs.extend(self.txs.iter().cloned());
        Block { header, txs }
    }

    pub fn reward(&self) -> Amount {
        self.reward
    }

    pub fn tx_count(&self) -> usize {
        self.txs.len() + 1
    }
}

pub fn extra_nonce_bytes(n1: u64, n2: u64) -> [u8; 20] {
    let mut buf = [0u8; 20];
    buf[0..8].copy_from_slice(&n1.to_le_bytes());
    buf[8..16].copy_from_slice(&n2.to_le_bytes());
    buf
}
