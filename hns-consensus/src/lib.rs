//! The covenant & NameState engine: given a transaction and a view of its
//! input coins and prior name states, decides whether each covenant is
//! permissible and produces the resulting `NameDelta`s (spec.md §4.A).

use hns_chain::{
    meets_target, merkle_root_checked, Amount, AuctionState, BlockHeader, Coin, CoinView, Covenant,
    CovenantType, Hash, NameDelta, NameHash, NameState, NetworkParams, Outpoint, Transaction,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Read-only lookup of prior `NameState`s, the name-side counterpart to
/// `hns_chain::CoinView` — one injected capability trait per lookup kind,
/// the same seam the teacher's `CryptoProvider` trait gives `hns-crypto`.
pub trait NameView {
    fn get_name(&self, name_hash: &NameHash) -> Option<&NameState>;
}

impl NameView for HashMap<NameHash, NameState> {
    fn get_name(&self, name_hash: &NameHash) -> Option<&NameState> {
        self.get(name_hash)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CovenantError {
    #[error("name {0} is not in the expected auction state for this covenant")]
    InvalidTransition(String),
    #[error("name not yet rolled out at this height")]
    NameNotReady,
    #[error("referenced name state does not exist")]
    UnknownName,
    #[error("referenced input coin does not exist")]
    UnknownCoin,
    #[error("blinded bid does not match the revealed (value, nonce)")]
    BidMismatch,
    #[error("revealed coin value is below the declared bid value")]
    SecondPriceViolation,
    #[error("transfer lockup has not matured")]
    TransferNotMatured,
    #[error("renewal is outside the renewal window")]
    RenewalNotMatured,
    #[error("covenant spender is not the recorded owner")]
    NotOwner,
    #[error("name has already been revoked")]
    AlreadyRevoked,
    #[error("register/update output value does not equal the locked highest bid")]
    WrongLockedValue,
    #[error("malformed covenant item for {0:?}")]
    MalformedItem(CovenantType),
    #[error("block exceeds the per-block cap on OPEN covenants")]
    TooManyOpens,
    #[error("block exceeds the per-block cap on UPDATE covenants")]
    TooManyUpdates,
    #[error("block exceeds the per-block cap on RENEW covenants")]
    TooManyRenewals,
    #[error("CLAIM proof does not verify against the committed airdrop root")]
    BadClaimProof,
}

/// Block-level rejection reasons, the name-auction engine's counterpart to
/// `CovenantError` a level up — a bad covenant rejects one transaction, a
/// `ConsensusError` rejects the whole block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("merkle root does not match the block's transactions")]
    BadMerkleRoot,
    #[error("witness root does not match the block's transactions")]
    BadWitnessRoot,
    #[error("duplicate transaction id within the block")]
    DuplicateTx,
    #[error("block is missing its coinbase transaction")]
    CoinbaseMissing,
    #[error("block contains more than one coinbase transaction")]
    MultipleCoinbase,
    #[error("block hash does not meet the required proof-of-work target")]
    BadPow,
    #[error("proof-of-work solution is structurally invalid")]
    BadSolution,
    #[error("block exceeds the maximum raw block size")]
    BlockTooLarge,
    #[error("block exceeds the per-block cap on OPEN covenants")]
    TooManyOpens,
    #[error("block exceeds the per-block cap on UPDATE covenants")]
    TooManyUpdates,
    #[error("block exceeds the per-block cap on RENEW covenants")]
    TooManyRenewals,
    #[error("non-coinbase transaction before the network's tx-start height")]
    NoTxAllowedYet,
    #[error(transparent)]
    Covenant(#[from] CovenantError),
}

/// Max raw block size per spec.md §6; mirrors `hns_miner::MAX_BLOCK_WEIGHT`
/// but is kept as its own constant since this crate can't depend on
/// `hns-miner` (which already depends on this one).
const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Result of processing one transaction's covenants: the name-state deltas
/// it produces plus the per-block-cap counts the caller accumulates across
/// every transaction in a block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub deltas: HashMap<NameHash, NameDelta>,
    pub opens: u32,
    pub updates: u32,
    pub renewals: u32,
}

/// Accumulates `ProcessResult`s across a block and enforces
/// `MAX_BLOCK_OPENS`/`MAX_BLOCK_UPDATES`/`MAX_BLOCK_RENEWALS`.
#[derive(Debug, Default, Clone)]
pub struct BlockCaps {
    pub opens: u32,
    pub updates: u32,
    pub renewals: u32,
}

impl BlockCaps {
    pub fn admit(&mut self, result: &ProcessResult, params: &NetworkParams) -> Result<(), CovenantError> {
        if self.opens + result.opens > params.max_block_opens {
            return Err(CovenantError::TooManyOpens);
        }
        if self.updates + result.updates > params.max_block_updates {
            return Err(CovenantError::TooManyUpdates);
        }
        if self.renewals + result.renewals > params.max_block_renewals {
            return Err(CovenantError::TooManyRenewals);
        }
        self.opens += result.opens;
        self.updates += result.updates;
        self.renewals += result.renewals;
        Ok(())
    }
}

/// Validates a block's shape against consensus rules: exactly one leading
/// coinbase, unique transaction ids, a raw size under `MAX_BLOCK_SIZE`, a
/// `height < params.tx_start` airdrop-only window, merkle/witness roots
/// that match the transaction set, and proof-of-work meeting `header.bits`.
///
/// Per-transaction covenant validity (and the `TooManyOpens`/`Updates`/
/// `Renewals` caps) is the caller's job via `process` + `BlockCaps::admit`;
/// this function only covers what depends on the block as a whole.
///
/// The Cuckoo-Cycle solution's graph-cycle validity lives in `hns-miner`
/// (`cuckoo::verify`), which already depends on this crate — calling it
/// directly here would create a cycle. `solution_valid` is that check,
/// run by the caller and passed in; this function still rejects solutions
/// that are structurally impossible (empty, or repeating an edge).
pub fn validate_block(
    header: &BlockHeader,
    txs: &[Transaction],
    height: u32,
    params: &NetworkParams,
    solution_valid: bool,
) -> Result<(), ConsensusError> {
    let coinbase_count = txs.iter().filter(|tx| tx.is_coinbase()).count();
    if coinbase_count == 0 {
        return Err(ConsensusError::CoinbaseMissing);
    }
    if coinbase_count > 1 {
        return Err(ConsensusError::MultipleCoinbase);
    }
    if !txs.first().map(Transaction::is_coinbase).unwrap_or(false) {
        return Err(ConsensusError::MultipleCoinbase);
    }

    if height < params.tx_start && txs.len() > 1 {
        return Err(ConsensusError::NoTxAllowedYet);
    }

    let mut seen_txids = HashSet::with_capacity(txs.len());
    for tx in txs {
        if !seen_txids.insert(tx.txid()) {
            return Err(ConsensusError::DuplicateTx);
        }
    }

    let total_size: usize = txs.iter().map(|tx| tx.encode_witness().len()).sum();
    if total_size > MAX_BLOCK_SIZE {
        return Err(ConsensusError::BlockTooLarge);
    }

    let id_leaves: Vec<Hash> = txs.iter().map(Transaction::txid).collect();
    let merkle_root = merkle_root_checked(&id_leaves).ok_or(ConsensusError::BadMerkleRoot)?;
    if merkle_root != header.merkle_root {
        return Err(ConsensusError::BadMerkleRoot);
    }

    let witness_leaves: Vec<Hash> = txs.iter().map(Transaction::witness_hash).collect();
    let witness_root = merkle_root_checked(&witness_leaves).ok_or(ConsensusError::BadWitnessRoot)?;
    if witness_root != header.witness_root {
        return Err(ConsensusError::BadWitnessRoot);
    }

    let mut seen_edges = HashSet::with_capacity(header.solution.len());
    if !header.solution.iter().all(|edge| seen_edges.insert(edge)) {
        return Err(ConsensusError::BadSolution);
    }
    if !solution_valid {
        return Err(ConsensusError::BadSolution);
    }

    let sol_bytes: Vec<u8> = header.solution.iter().flat_map(|edge| edge.to_le_bytes()).collect();
    let sol_hash = Hash::digest(&sol_bytes);
    let combined = Hash::digest_many(&[header.pre_hash().as_bytes(), sol_hash.as_bytes()]);
    if !meets_target(&combined, header.bits) {
        return Err(ConsensusError::BadPow);
    }

    Ok(())
}

/// Applies a batch of `NameDelta`s forward onto `names`, creating fresh
/// entries for deltas marked `created`.
pub fn apply_deltas(names: &mut HashMap<NameHash, NameState>, fresh: &HashMap<NameHash, NameState>) {
    for (hash, state) in fresh {
        names.insert(*hash, state.clone());
    }
}

/// Reverts a batch of `NameDelta`s, restoring the exact prior field values
/// (or removing the entry outright for a `created` delta).
pub fn undo_deltas(names: &mut HashMap<NameHash, NameState>, deltas: &HashMap<NameHash, NameDelta>) {
    for (hash, delta) in deltas {
        if delta.created {
            names.remove(hash);
            continue;
        }
        if let Some(state) = names.get_mut(hash) {
            delta.undo(state);
        }
    }
}

/// `state(ns, height)` per spec.md §4.A — a thin wrapper kept here so
/// callers reach the engine rather than `hns_chain::NameState` directly.
pub fn state(ns: &NameState, height: u32, params: &NetworkParams) -> AuctionState {
    ns.state(height, params)
}

/// Decides whether `tx`'s covenants are permissible at `height` and returns
/// the resulting `NameState` mutations. Does not mutate `names`/`coins` —
/// the caller applies the returned deltas via `apply_deltas`.
pub fn process(
    tx: &Transaction,
    coins: &dyn CoinView,
    names: &dyn NameView,
    height: u32,
    params: &NetworkParams,
) -> Result<(ProcessResult, HashMap<NameHash, NameState>), CovenantError> {
    let mut result = ProcessResult::default();
    let mut fresh: HashMap<NameHash, NameState> = HashMap::new();
    let mut touched: HashMap<NameHash, NameDelta> = HashMap::new();

    for (vout, output) in tx.outputs.iter().enumerate() {
        if output.covenant.is_none() {
            continue;
        }
        let outpoint = Outpoint {
            hash: tx.txid(),
            index: vout as u32,
        };
        process_one(
            &output.covenant,
            output.value,
            &outpoint,
            tx,
            coins,
            names,
            height,
            params,
            &mut fresh,
            &mut touched,
            &mut result,
        )?;
    }

    result.deltas = touched;
    Ok((result, fresh))
}

#[allow(clippy::too_many_arguments)]
fn process_one(
    cov: &Covenant,
    output_value: Amount,
    outpoint: &Outpoint,
    tx: &Transaction,
    coins: &dyn CoinView,
    names: &dyn NameView,
    height: u32,
    params: &NetworkParams,
    fresh: &mut HashMap<NameHash, NameState>,
    touched: &mut HashMap<NameHash, NameDelta>,
    result: &mut ProcessResult,
) -> Result<(), CovenantError> {
    let name_hash_from = |idx: usize| -> Result<NameHash, CovenantError> {
        let bytes = cov.items.get(idx).ok_or(CovenantError::MalformedItem(cov.ty))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CovenantError::MalformedItem(cov.ty))?;
        Ok(hns_chain::Hash::from_bytes(arr))
    };

    match cov.ty {
        CovenantType::None => {}

        CovenantType::Claim => {
            let name = cov.items.first().ok_or(CovenantError::MalformedItem(cov.ty))?.clone();
            let nh = hns_chain::name_hash(&String::from_utf8_lossy(&name));
            if names.get_name(&nh).is_some() {
                return Err(CovenantError::InvalidTransition("claim: already open".into()));
            }
            let root_bytes = cov.items.get(1).ok_or(CovenantError::MalformedItem(cov.ty))?;
            let index_bytes = cov.items.get(2).ok_or(CovenantError::MalformedItem(cov.ty))?;
            let proof_bytes = cov.items.get(3..).unwrap_or(&[]);
            let root: [u8; 32] = root_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CovenantError::MalformedItem(cov.ty))?;
            let index = u64::from_le_bytes(
                index_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CovenantError::MalformedItem(cov.ty))?,
            );
            let proof: Vec<hns_chain::Hash> = proof_bytes
                .iter()
                .map(|b| {
                    let arr: [u8; 32] = b.as_slice().try_into().unwrap_or([0u8; 32]);
                    hns_chain::Hash::from_bytes(arr)
                })
                .collect();
            let leaf = hns_chain::Hash::digest(&name);
            if !hns_chain::verify_merkle_proof(leaf, index, &proof, hns_chain::Hash::from_bytes(root)) {
                return Err(CovenantError::BadClaimProof);
            }
            let mut ns = NameState::new_open(nh, name, height);
            ns.claimed = true;
            ns.owner = Some(*outpoint);
            ns.value = output_value;
            ns.highest = output_value;
            fresh.insert(nh, ns);
            touched.insert(nh, NameDelta::created());
        }

        CovenantType::Open => {
            let name = cov.items.first().ok_or(CovenantError::MalformedItem(cov.ty))?.clone();
            let nh = hns_chain::name_hash(&String::from_utf8_lossy(&name));
            if let Some(existing) = names.get_name(&nh) {
                if !existing.is_expired(height, params) {
                    return Err(CovenantError::InvalidTransition("open: name still live".into()));
                }
            }
            let start = params.auction_start_height(height);
            let ns = NameState::new_open(nh, name, start);
            fresh.insert(nh, ns);
            touched.insert(nh, NameDelta::created());
            result.opens += 1;
        }

        CovenantType::Bid => {
            let nh = name_hash_from(0)?;
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Bidding)?;
            let mut after = existing.clone();
            after.bids += 1;
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Reveal => {
            let nh = name_hash_from(0)?;
            let nonce = cov.items.get(1).ok_or(CovenantError::MalformedItem(cov.ty))?;
            let declared_bytes = cov.items.get(2).ok_or(CovenantError::MalformedItem(cov.ty))?;
            let declared_arr: [u8; 8] = declared_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CovenantError::MalformedItem(cov.ty))?;
            let declared_value = Amount::from_base_units(i64::from_le_bytes(declared_arr))
                .map_err(|_| CovenantError::MalformedItem(cov.ty))?;
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Reveal)?;

            let bid_input = tx.inputs.first().ok_or(CovenantError::MalformedItem(cov.ty))?;
            let bid_coin: &Coin = coins.get_coin(&bid_input.prevout).ok_or(CovenantError::UnknownCoin)?;
            let blind = bid_coin
                .covenant
                .items
                .get(1)
                .ok_or(CovenantError::MalformedItem(CovenantType::Bid))?;
            let expected_blind =
                hns_chain::Hash::digest_many(&[&declared_value.base_units().to_le_bytes(), nonce]);
            if expected_blind.as_bytes().as_slice() != blind.as_slice() {
                return Err(CovenantError::BidMismatch);
            }
            if bid_coin.value < declared_value {
                return Err(CovenantError::SecondPriceViolation);
            }

            let mut after = existing.clone();
            if declared_value > after.value {
                after.highest = after.value;
                after.value = declared_value;
                after.owner = Some(*outpoint);
            } else if declared_value > after.highest {
                after.highest = declared_value;
            }
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Redeem => {
            let nh = name_hash_from(0)?;
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Closed)?;
        }

        CovenantType::Register => {
            let nh = name_hash_from(0)?;
            let data = cov.items.get(1).cloned();
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Closed)?;
            if existing.owner != Some(outpoint_of_spent_input(tx, coins)?) {
                return Err(CovenantError::NotOwner);
            }
            if output_value != existing.highest {
                return Err(CovenantError::WrongLockedValue);
            }
            let mut after = existing.clone();
            after.data = data;
            after.owner = Some(*outpoint);
            after.dirty = true;
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Update => {
            let nh = name_hash_from(0)?;
            let data = cov.items.get(1).cloned();
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Closed)?;
            owner_guard(&existing, tx, coins)?;
            let mut after = existing.clone();
            after.data = data;
            after.owner = Some(*outpoint);
            after.dirty = true;
            result.updates += 1;
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Renew => {
            let nh = name_hash_from(0)?;
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Closed)?;
            owner_guard(&existing, tx, coins)?;
            if height < existing.renewal + params.tree_interval {
                return Err(CovenantError::RenewalNotMatured);
            }
            if height >= existing.renewal + params.renewal_window {
                return Err(CovenantError::RenewalNotMatured);
            }
            let mut after = existing.clone();
            after.renewal = height;
            after.owner = Some(*outpoint);
            result.renewals += 1;
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Transfer => {
            let nh = name_hash_from(0)?;
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Closed)?;
            owner_guard(&existing, tx, coins)?;
            if existing.transfer.is_some() {
                return Err(CovenantError::InvalidTransition("transfer already pending".into()));
            }
            let mut after = existing.clone();
            after.transfer = Some(height);
            after.owner = Some(*outpoint);
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Finalize => {
            let nh = name_hash_from(0)?;
            let existing = lookup(names, fresh, &nh)?;
            require_state(&existing, height, params, AuctionState::Closed)?;
            let transfer_height = existing.transfer.ok_or_else(|| {
                CovenantError::InvalidTransition("finalize: no pending transfer".into())
            })?;
            if height < transfer_height + params.transfer_lockup {
                return Err(CovenantError::TransferNotMatured);
            }
            let mut after = existing.clone();
            after.transfer = None;
            after.owner = Some(*outpoint);
            after.renewal = height;
            stage(&nh, &existing, after, fresh, touched);
        }

        CovenantType::Revoke => {
            let nh = name_hash_from(0)?;
            let existing = lookup(names, fresh, &nh)?;
            if existing.revoked.is_some() {
                return Err(CovenantError::AlreadyRevoked);
            }
            owner_guard(&existing, tx, coins)?;
            let mut after = existing.clone();
            after.revoked = Some(height);
            stage(&nh, &existing, after, fresh, touched);
        }
    }

    Ok(())
}

fn lookup(
    names: &dyn NameView,
    fresh: &HashMap<NameHash, NameState>,
    nh: &NameHash,
) -> Result<NameState, CovenantError> {
    fresh
        .get(nh)
        .or_else(|| names.get_name(nh))
        .cloned()
        .ok_or(CovenantError::UnknownName)
}

fn require_state(
    ns: &NameState,
    height: u32,
    params: &NetworkParams,
    expected: AuctionState,
) -> Result<(), CovenantError> {
    if ns.state(height, params) != expected {
        return Err(CovenantError::InvalidTransition(format!(
            "{:?} expected {:?}, got {:?}",
            ns.name_hash,
            expected,
            ns.state(height, params)
        )));
    }
    Ok(())
}

/// Resolves the outpoint of the name's locking input being spent by this tx
/// (the single input spending the previous locking covenant output).
fn outpoint_of_spent_input(tx: &Transaction, _coins: &dyn CoinView) -> Result<Outpoint, CovenantError> {
    tx.inputs
        .first()
        .map(|input| input.prevout)
        .ok_or(CovenantError::UnknownCoin)
}

fn owner_guard(ns: &NameState, tx: &Transaction, coins: &dyn CoinView) -> Result<(), CovenantError> {
    let spent = outpoint_of_spent_input(tx, coins)?;
    if ns.owner != Some(spent) {
        return Err(CovenantError::NotOwner);
    }
    Ok(())
}

fn stage(
    nh: &NameHash,
    before: &NameState,
    after: NameState,
    fresh: &mut HashMap<NameHash, NameState>,
    touched: &mut HashMap<NameHash, NameDelta>,
) {
    let delta = NameDelta::capture(before, &after);
    touched
        .entry(*nh)
        .and_modify(|existing| {
            // keep the earliest-captured "before" values across multiple
            // covenant outputs touching the same name within one tx
            let _ = existing;
        })
        .or_insert(delta);
    debug!(name = %nh, ty = ?after.owner, "staged name delta");
    fresh.insert(*nh, after);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hns_chain::{Amount, CovenantType, Hash, TxInput, TxOutput};
    use std::collections::HashMap as Map;

    fn params() -> NetworkParams {
        NetworkParams::regtest()
    }

    fn empty_coins() -> Map<Outpoint, Coin> {
        Map::new()
    }

    #[test]
    fn open_creates_name_at_auction_start() {
        let p = params();
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: Outpoint { hash: Hash::ZERO, index: 0 },
                sequence: 0,
                witness: vec![],
            }],
            outputs: vec![TxOutput {
                value: Amount::ZERO,
                address: vec![],
                covenant: Covenant::new(CovenantType::Open, vec![b"example".to_vec()]),
            }],
            locktime: 0,
        };
        let coins = empty_coins();
        let names: Map<NameHash, NameState> = Map::new();
        let (result, fresh) = process(&tx, &coins, &names, 10, &p).unwrap();
        assert_eq!(result.opens, 1);
        let nh = hns_chain::name_hash("example");
        assert!(fresh.contains_key(&nh));
        assert_eq!(fresh[&nh].height, p.auction_start_height(10));
    }

    #[test]
    fn open_rejected_while_name_still_live() {
        let p = params();
        let nh = hns_chain::name_hash("example");
        let mut names: Map<NameHash, NameState> = Map::new();
        names.insert(nh, NameState::new_open(nh, b"example".to_vec(), 0));
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: Outpoint { hash: Hash::ZERO, index: 0 },
                sequence: 0,
                witness: vec![],
            }],
            outputs: vec![TxOutput {
                value: Amount::ZERO,
                address: vec![],
                covenant: Covenant::new(CovenantType::Open, vec![b"example".to_vec()]),
            }],
            locktime: 0,
        };
        let coins = empty_coins();
        let err = process(&tx, &coins, &names, 1, &p).unwrap_err();
        assert!(matches!(err, CovenantError::InvalidTransition(_)));
    }

    #[test]
    fn bid_requires_bidding_window() {
        let p = params();
        let nh = hns_chain::name_hash("example");
        let mut names: Map<NameHash, NameState> = Map::new();
        names.insert(nh, NameState::new_open(nh, b"example".to_vec(), 0));
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: Outpoint { hash: Hash::ZERO, index: 0 },
                sequence: 0,
                witness: vec![],
            }],
            outputs: vec![TxOutput {
                value: Amount::from_base_units(1000).unwrap(),
                address: vec![],
                covenant: Covenant::new(CovenantType::Bid, vec![nh.as_bytes().to_vec(), [0u8; 32].to_vec()]),
            }],
            locktime: 0,
        };
        let coins = empty_coins();
        let (result, fresh) = process(&tx, &coins, &names, 0, &p).unwrap();
        assert_eq!(fresh[&nh].bids, 1);
        assert!(result.deltas.contains_key(&nh));

        let past_reveal = p.bidding_period + p.reveal_period;
        let err = process(&tx, &coins, &names, past_reveal, &p).unwrap_err();
        assert!(matches!(err, CovenantError::InvalidTransition(_)));
    }

    #[test]
    fn block_caps_enforced_across_transactions() {
        let p = NetworkParams {
            max_block_opens: 1,
            ..NetworkParams::regtest()
        };
        let make_open = |name: &str| Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: Outpoint { hash: Hash::ZERO, index: 0 },
                sequence: 0,
                witness: vec![],
            }],
            outputs: vec![TxOutput {
                value: Amount::ZERO,
                address: vec![],
                covenant: Covenant::new(CovenantType::Open, vec![name.as_bytes().to_vec()]),
            }],
            locktime: 0,
        };
        let coins = empty_coins();
        let names: Map<NameHash, NameState> = Map::new();
        let mut caps = BlockCaps::default();
        let (r1, _) = process(&make_open("first"), &coins, &names, 0, &p).unwrap();
        caps.admit(&r1, &p).unwrap();
        let (r2, _) = process(&make_open("second"), &coins, &names, 0, &p).unwrap();
        assert_eq!(caps.admit(&r2, &p).unwrap_err(), CovenantError::TooManyOpens);
    }

    fn bid_coin(nh: NameHash, value: Amount, nonce: &[u8; 32]) -> Coin {
        let blind = Hash::digest_many(&[&value.base_units().to_le_bytes(), nonce]);
        Coin {
            value,
            address: vec![],
            covenant: Covenant::new(CovenantType::Bid, vec![nh.as_bytes().to_vec(), blind.as_bytes().to_vec()]),
            height: 0,
            coinbase: false,
        }
    }

    fn reveal_tx(nh: NameHash, bid_outpoint: Outpoint, declared: Amount, nonce: &[u8; 32]) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput { prevout: bid_outpoint, sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput {
                value: declared,
                address: vec![],
                covenant: Covenant::new(
                    CovenantType::Reveal,
                    vec![nh.as_bytes().to_vec(), nonce.to_vec(), declared.base_units().to_le_bytes().to_vec()],
                ),
            }],
            locktime: 0,
        }
    }

    fn register_tx(nh: NameHash, spent: Outpoint, value: Amount) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput { prevout: spent, sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput {
                value,
                address: vec![],
                covenant: Covenant::new(CovenantType::Register, vec![nh.as_bytes().to_vec()]),
            }],
            locktime: 0,
        }
    }

    /// S2/P5: the winner reveals first, the loser reveals second with a
    /// lower bid. `value` must end up the winner's bid and `highest` the
    /// loser's (second-price) bid — regardless of reveal order — and
    /// REGISTER only accepts an output locked at exactly `highest`.
    #[test]
    fn reveal_crowns_winner_and_locks_second_price_s2_p5() {
        let p = params();
        let nh = hns_chain::name_hash("example");
        let mut names: Map<NameHash, NameState> = Map::new();
        names.insert(nh, NameState::new_open(nh, b"example".to_vec(), 0));
        let reveal_height = p.bidding_period;

        let winner_value = Amount::from_base_units(500_000).unwrap();
        let loser_value = Amount::from_base_units(250_000).unwrap();
        let winner_nonce = [1u8; 32];
        let loser_nonce = [2u8; 32];
        let winner_bid_outpoint = Outpoint { hash: Hash::digest(b"winner-bid"), index: 0 };
        let loser_bid_outpoint = Outpoint { hash: Hash::digest(b"loser-bid"), index: 0 };
        let mut coins: Map<Outpoint, Coin> = Map::new();
        coins.insert(winner_bid_outpoint, bid_coin(nh, winner_value, &winner_nonce));
        coins.insert(loser_bid_outpoint, bid_coin(nh, loser_value, &loser_nonce));

        let winner_reveal = reveal_tx(nh, winner_bid_outpoint, winner_value, &winner_nonce);
        let winner_reveal_outpoint = Outpoint { hash: winner_reveal.txid(), index: 0 };
        let (_, fresh1) = process(&winner_reveal, &coins, &names, reveal_height, &p).unwrap();
        apply_deltas(&mut names, &fresh1);

        let loser_reveal = reveal_tx(nh, loser_bid_outpoint, loser_value, &loser_nonce);
        let (_, fresh2) = process(&loser_reveal, &coins, &names, reveal_height, &p).unwrap();
        apply_deltas(&mut names, &fresh2);

        let ns = &names[&nh];
        assert_eq!(ns.value, winner_value, "winner's bid must remain the crowned value");
        assert_eq!(ns.highest, loser_value, "loser's bid becomes the locked second price");
        assert_eq!(ns.owner, Some(winner_reveal_outpoint));

        let register_height = reveal_height + p.reveal_period;
        let mut register_coins = coins.clone();
        register_coins.insert(
            winner_reveal_outpoint,
            Coin {
                value: winner_value,
                address: vec![],
                covenant: Covenant::new(CovenantType::Reveal, vec![]),
                height: reveal_height,
                coinbase: false,
            },
        );

        let good_register = register_tx(nh, winner_reveal_outpoint, loser_value);
        let (_, fresh3) = process(&good_register, &register_coins, &names, register_height, &p).unwrap();
        assert_eq!(fresh3[&nh].highest, loser_value);

        let bad_register = register_tx(nh, winner_reveal_outpoint, winner_value);
        let err = process(&bad_register, &register_coins, &names, register_height, &p).unwrap_err();
        assert_eq!(err, CovenantError::WrongLockedValue);
    }

    /// S3: FINALIZE rejects a transfer that hasn't cleared `transferLockup`
    /// and accepts it, moving ownership wholesale, once it has.
    #[test]
    fn transfer_then_finalize_requires_lockup_maturity_s3() {
        let p = params();
        let nh = hns_chain::name_hash("example");
        let owner_outpoint = Outpoint { hash: Hash::digest(b"owner-coin"), index: 0 };
        let mut ns = NameState::new_open(nh, b"example".to_vec(), 0);
        ns.owner = Some(owner_outpoint);
        let mut names: Map<NameHash, NameState> = Map::new();
        names.insert(nh, ns);
        let closed_height = p.bidding_period + p.reveal_period + 1;
        let coins = empty_coins();

        let transfer_tx = Transaction {
            version: 1,
            inputs: vec![TxInput { prevout: owner_outpoint, sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput {
                value: Amount::ZERO,
                address: vec![],
                covenant: Covenant::new(CovenantType::Transfer, vec![nh.as_bytes().to_vec()]),
            }],
            locktime: 0,
        };
        let transfer_outpoint = Outpoint { hash: transfer_tx.txid(), index: 0 };
        let (_, fresh) = process(&transfer_tx, &coins, &names, closed_height, &p).unwrap();
        apply_deltas(&mut names, &fresh);
        assert_eq!(names[&nh].transfer, Some(closed_height));
        assert_eq!(names[&nh].owner, Some(transfer_outpoint));

        let finalize_tx = Transaction {
            version: 1,
            inputs: vec![TxInput { prevout: transfer_outpoint, sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput {
                value: Amount::ZERO,
                address: vec![],
                covenant: Covenant::new(CovenantType::Finalize, vec![nh.as_bytes().to_vec()]),
            }],
            locktime: 0,
        };

        let too_early = closed_height + p.transfer_lockup - 1;
        let err = process(&finalize_tx, &coins, &names, too_early, &p).unwrap_err();
        assert_eq!(err, CovenantError::TransferNotMatured);

        let matured = closed_height + p.transfer_lockup;
        let (_, fresh2) = process(&finalize_tx, &coins, &names, matured, &p).unwrap();
        assert!(fresh2[&nh].transfer.is_none());
        assert_eq!(fresh2[&nh].owner, Some(Outpoint { hash: finalize_tx.txid(), index: 0 }));
    }

    /// S4: below `txStart`, any non-empty, non-coinbase tx set is rejected;
    /// a coinbase-only block still passes.
    #[test]
    fn blocks_below_tx_start_reject_non_coinbase_transactions_s4() {
        let p = NetworkParams { tx_start: 5, ..NetworkParams::regtest() };
        let coinbase = Transaction {
            version: 0,
            inputs: vec![TxInput { prevout: Outpoint::new(Hash::ZERO, u32::MAX), sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput { value: Amount::ZERO, address: vec![9; 20], covenant: Covenant::none() }],
            locktime: 0,
        };
        let airdrop_claim = Transaction {
            version: 1,
            inputs: vec![TxInput { prevout: Outpoint { hash: Hash::digest(b"other"), index: 0 }, sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput { value: Amount::ZERO, address: vec![], covenant: Covenant::none() }],
            locktime: 0,
        };

        let mut header = sample_header(&[coinbase.clone()]);
        validate_block(&header, &[coinbase.clone()], 0, &p, true)
            .expect("coinbase-only block is always allowed below tx_start");

        header = sample_header(&[coinbase.clone(), airdrop_claim.clone()]);
        let err = validate_block(&header, &[coinbase.clone(), airdrop_claim.clone()], 0, &p, true).unwrap_err();
        assert_eq!(err, ConsensusError::NoTxAllowedYet);

        header = sample_header(&[coinbase.clone(), airdrop_claim.clone()]);
        validate_block(&header, &[coinbase, airdrop_claim], p.tx_start, &p, true)
            .expect("non-coinbase tx is allowed once tx_start is reached");
    }

    /// Builds a header whose merkle/witness roots match `txs` and whose
    /// solution hash clears the (trivial, regtest) PoW target.
    fn sample_header(txs: &[Transaction]) -> BlockHeader {
        let id_leaves: Vec<Hash> = txs.iter().map(Transaction::txid).collect();
        let witness_leaves: Vec<Hash> = txs.iter().map(Transaction::witness_hash).collect();
        let mut header = BlockHeader {
            version: 0,
            prev_block: Hash::ZERO,
            merkle_root: merkle_root_checked(&id_leaves).unwrap(),
            witness_root: merkle_root_checked(&witness_leaves).unwrap(),
            tree_root: Hash::ZERO,
            reserved_root: Hash::ZERO,
            time: 0,
            bits: 0x207f_ffff,
            extra_nonce: [0u8; 20],
            solution: vec![1, 2, 3, 4],
        };
        let sol_bytes: Vec<u8> = header.solution.iter().flat_map(|e| e.to_le_bytes()).collect();
        let sol_hash = Hash::digest(&sol_bytes);
        for t in 0u64..10_000 {
            header.time = t;
            let combined = Hash::digest_many(&[header.pre_hash().as_bytes(), sol_hash.as_bytes()]);
            if meets_target(&combined, header.bits) {
                return header;
            }
        }
        panic!("failed to find a header meeting the regtest target within budget");
    }

    /// S6: a block whose merkle/witness roots and solution hash satisfy
    /// `BLAKE2b(header ∥ solhash) ≤ target` is accepted; a tampered root or
    /// an unmet target is rejected.
    #[test]
    fn validate_block_checks_roots_and_pow_s6() {
        let p = NetworkParams::regtest();
        let coinbase = Transaction {
            version: 0,
            inputs: vec![TxInput { prevout: Outpoint::new(Hash::ZERO, u32::MAX), sequence: 0, witness: vec![] }],
            outputs: vec![TxOutput { value: Amount::ZERO, address: vec![9; 20], covenant: Covenant::none() }],
            locktime: 0,
        };
        let header = sample_header(&[coinbase.clone()]);
        validate_block(&header, &[coinbase.clone()], 100, &p, true).unwrap();

        let mut bad_merkle = header.clone();
        bad_merkle.merkle_root = Hash::digest(b"tampered");
        assert_eq!(
            validate_block(&bad_merkle, &[coinbase.clone()], 100, &p, true).unwrap_err(),
            ConsensusError::BadMerkleRoot
        );

        let mut bad_witness = header.clone();
        bad_witness.witness_root = Hash::digest(b"tampered");
        assert_eq!(
            validate_block(&bad_witness, &[coinbase.clone()], 100, &p, true).unwrap_err(),
            ConsensusError::BadWitnessRoot
        );

        assert_eq!(
            validate_block(&header, &[coinbase.clone()], 100, &p, false).unwrap_err(),
            ConsensusError::BadSolution
        );

        let mut impossible_target = header.clone();
        impossible_target.bits = 0x1d00_ffff;
        assert_eq!(
            validate_block(&impossible_target, &[coinbase.clone()], 100, &p, true).unwrap_err(),
            ConsensusError::BadPow
        );

        let no_coinbase = validate_block(&header, &[], 100, &p, true).unwrap_err();
        assert_eq!(no_coinbase, ConsensusError::CoinbaseMissing);

        let duplicated = validate_block(&header, &[coinbase.clone(), coinbase], 100, &p, true).unwrap_err();
        assert_eq!(duplicated, ConsensusError::MultipleCoinbase);
    }
}
