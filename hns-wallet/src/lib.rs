//! Wallet key custody (PBKDF2 + AES-256-GCM, kept from the teacher's
//! `dxid-wallet`) plus the TXDB balance/coin/name-state engine built around
//! it (spec.md §4.C): the tx state machine, balance accounting, reorg
//! handling, and address-gap discovery.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, Result};
use hns_chain::{Amount, Coin, Hash, NameHash, NameState, Outpoint, Transaction};
use hns_crypto::{address_hash, generate_keypair, KeyPair};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Wallet-layer rejection reasons (spec.md §4.C), the same one-enum-per-crate
/// discipline as `CovenantError` in `hns-consensus`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("insufficient funds: need {required}")]
    InsufficientFunds { required: Amount },
    #[error("unconfirmed ancestor chain exceeds the mempool depth limit")]
    TooManyAncestors,
    #[error("no such wallet account")]
    AccountNotFound,
    #[error("transaction references outputs this wallet doesn't know about")]
    MissingOutputs,
    #[error("passphrase does not decrypt this wallet's secret key")]
    InvalidPassphrase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub name: String,
    pub address_hash: [u8; 20],
    pub public_key: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub nonce: [u8; 12],
}

pub struct WalletStore {
    root: PathBuf,
}

impl WalletStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn create(&self, name: &str, password: &str) -> Result<(Wallet, KeyPair)> {
        let kp = generate_keypair();
        let addr = address_hash(&kp.public_key);
        let (encrypted_secret, nonce) = encrypt_secret(&kp.secret_key.secret_bytes(), password)?;
        let wallet = Wallet {
            name: name.to_string(),
            address_hash: addr,
            public_key: kp.public_key.serialize().to_vec(),
            encrypted_secret,
            nonce,
        };
        let path = self.root.join(format!("{name}.json"));
        fs::write(path, serde_json::to_vec_pretty(&wallet)?)?;
        Ok((wallet, kp))
    }

    pub fn list(&self) -> Result<Vec<Wallet>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let bytes = fs::read(entry.path())?;
                let wallet: Wallet = serde_json::from_slice(&bytes)?;
                out.push(wallet);
            }
        }
        Ok(out)
    }

    pub fn load(&self, name: &str) -> Result<Wallet> {
        let path = self.root.join(format!("{name}.json"));
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::Error::new(WalletError::AccountNotFound)
            } else {
                anyhow!(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn unlock_secret(&self, wallet: &Wallet, password: &str) -> Result<Vec<u8>> {
        decrypt_secret(&wallet.encrypted_secret, &wallet.nonce, password)
            .map_err(|_| anyhow::Error::new(WalletError::InvalidPassphrase))
    }
}

fn encrypt_secret(secret: &[u8], password: &str) -> Result<(Vec<u8>, [u8; 12])> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let mut key = [0u8; 32];
    pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), &salt, 10_000, &mut key);
    let cipher = Aes256Gcm::new_from_slice(&key)?;
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, secret)
        .map_err(|e| anyhow!("encrypt failed: {e}"))?;
    let mut out = salt.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok((out, nonce_bytes))
}

fn decrypt_secret(ciphertext: &[u8], nonce: &[u8; 12], password: &str) -> Result<Vec<u8>> {
    if ciphertext.len() < 16 {
        return Err(anyhow!("ciphertext too short"));
    }
    let (salt, ct) = ciphertext.split_at(16);
    let mut key = [0u8; 32];
    pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, 10_000, &mut key);
    let cipher = Aes256Gcm::new_from_slice(&key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|e| anyhow!("decrypt failed: {e}"))?;
    Ok(plaintext)
}

/// Balance split per spec.md §4.C: confirmed/unconfirmed, and the portion of
/// each that's held under a locking covenant (BID/REVEAL/REGISTER/...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: Amount,
    pub unconfirmed: Amount,
    pub locked_confirmed: Amount,
    pub locked_unconfirmed: Amount,
}

/// A coin's lifecycle: created unconfirmed by a tx seen in the mempool,
/// promoted to confirmed once that tx is mined, demoted back on reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Unconfirmed,
    Confirmed { height: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletCoin {
    pub coin: Coin,
    pub state: TxState,
}

/// The gap-limit address-discovery window: addresses up to `next` are
/// handed out; any index beyond the highest *used* index plus the gap
/// limit is not yet watched.
#[derive(Debug, Clone)]
pub struct AddressGap {
    pub limit: u32,
    pub next: u32,
    pub highest_used: Option<u32>,
}

impl AddressGap {
    pub fn new(limit: u32) -> Self {
        AddressGap {
            limit,
            next: 0,
            highest_used: None,
        }
    }

    pub fn watch_window(&self) -> std::ops::Range<u32> {
        0..self.next.max(self.limit)
    }

    /// Marks `index` as used by an observed output; late discovery (spec.md
    /// §4.C) extends the window past the gap limit if the index was within
    /// the previously watched range's lookahead.
    pub fn mark_used(&mut self, index: u32) {
        self.highest_used = Some(self.highest_used.map_or(index, |h| h.max(index)));
        let wanted = index + self.limit + 1;
        if wanted > self.next {
            self.next = wanted;
        }
    }
}

/// The wallet's view of chain state: confirmed coins/names plus any
/// unconfirmed (mempool) overlay, with an explicit "marked" height per
/// spec.md §4.C's stickiness rule — a coin's locked classification does not
/// change retroactively just because a later block altered the name.
/// Unconfirmed ancestor limit (spec.md §4.C invariant 4): the wallet
/// refuses to extend a mempool chain deeper than this.
pub const MEMPOOL_MAX_ANCESTORS: usize = 25;

#[derive(Debug, Default)]
pub struct TxDb {
    coins: HashMap<Outpoint, WalletCoin>,
    spent: HashMap<Outpoint, Hash>,
    names: HashMap<NameHash, NameState>,
    tip: u32,
    /// Set true on the first confirmed wallet tx and never reset except by
    /// un-confirming that same tx (spec.md §4.C invariant 3).
    marked: bool,
    start_height: u32,
    start_hash: Hash,
    /// Unconfirmed-ancestor-chain depth per pending txid (spec.md §4.C
    /// invariant 4), populated by `record_ancestor_depth`.
    tx_depth: HashMap<Hash, usize>,
    /// Running totals, moved by the delta of whatever output an event
    /// handler touches — never recomputed from a full scan (spec.md §4.C).
    balance: Balance,
}

impl TxDb {
    pub fn new() -> Self {
        TxDb::default()
    }

    pub fn marked(&self) -> bool {
        self.marked
    }

    pub fn start(&self) -> (u32, Hash) {
        (self.start_height, self.start_hash)
    }

    /// The ancestor chain depth a new tx spending `prevouts` would have:
    /// one more than the deepest unconfirmed input it spends, or zero if
    /// every input is confirmed or external.
    pub fn ancestor_depth(&self, prevouts: &[Outpoint]) -> usize {
        prevouts
            .iter()
            .map(|op| match self.coins.get(op) {
                Some(wc) if matches!(wc.state, TxState::Unconfirmed) => {
                    self.tx_depth.get(&op.hash).copied().unwrap_or(0) + 1
                }
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Records `txid`'s ancestor depth once its inputs are known to be
    /// acceptable, so later spends of its outputs can look it up.
    pub fn record_ancestor_depth(&mut self, txid: Hash, depth: usize) {
        self.tx_depth.insert(txid, depth);
    }

    /// Adds a coin as seen in an unconfirmed (mempool) transaction.
    pub fn insert_unconfirmed(&mut self, outpoint: Outpoint, coin: Coin) {
        if let Some(old) = self.coins.get(&outpoint) {
            if !self.spent.contains_key(&outpoint) {
                let locked = old.coin.covenant.ty.is_locking();
                let confirmed = matches!(old.state, TxState::Confirmed { .. });
                self.sub_balance(locked, confirmed, old.coin.value);
            }
        }
        let locked = coin.covenant.ty.is_locking();
        let value = coin.value;
        self.coins.insert(
            outpoint,
            WalletCoin {
                coin,
                state: TxState::Unconfirmed,
            },
        );
        self.add_balance(locked, false, value);
    }

    /// Promotes a previously unconfirmed coin among `outputs` to confirmed at
    /// `height`, crediting any output newly matched by late address discovery
    /// (spec.md §4.C) that this wallet had never seen before. Every field
    /// moves by exactly the touched outputs' deltas, never by recomputation.
    pub fn confirm(&mut self, outputs: &[(Outpoint, Coin)], height: u32, block_hash: Hash) -> Result<(), WalletError> {
        if outputs.is_empty() {
            return Err(WalletError::MissingOutputs);
        }
        for (outpoint, coin) in outputs {
            self.credit_confirmed(*outpoint, coin.clone(), height);
        }
        if !self.marked {
            self.marked = true;
            self.start_height = height;
            self.start_hash = block_hash;
        }
        Ok(())
    }

    /// Demotes a confirmed coin back to unconfirmed (reorg). If this was the
    /// wallet's last confirmed tx, `marked` clears and `start*` resets to
    /// the current tip, per spec.md §4.C invariant 3.
    pub fn unconfirm(&mut self, outpoint: Outpoint) -> Result<(), WalletError> {
        let entry = self.coins.get_mut(&outpoint).ok_or(WalletError::MissingOutputs)?;
        if matches!(entry.state, TxState::Confirmed { .. }) {
            let locked = entry.coin.covenant.ty.is_locking();
            let value = entry.coin.value;
            entry.state = TxState::Unconfirmed;
            self.sub_balance(locked, true, value);
            self.add_balance(locked, false, value);
        }
        if self.marked && !self.coins.values().any(|c| matches!(c.state, TxState::Confirmed { .. })) {
            self.marked = false;
            self.start_height = self.tip;
            self.start_hash = Hash::ZERO;
        }
        Ok(())
    }

    /// Shared by `confirm` and `add_block`: promotes an already-tracked
    /// unconfirmed coin, or credits a never-before-seen one directly as
    /// confirmed (late address discovery).
    fn credit_confirmed(&mut self, outpoint: Outpoint, coin: Coin, height: u32) {
        let locked = coin.covenant.ty.is_locking();
        match self.coins.get_mut(&outpoint) {
            Some(entry) if matches!(entry.state, TxState::Unconfirmed) => {
                entry.state = TxState::Confirmed { height };
                self.sub_balance(locked, false, coin.value);
                self.add_balance(locked, true, coin.value);
            }
            Some(_) => {}
            None => {
                self.add_balance(locked, true, coin.value);
                self.coins.insert(
                    outpoint,
                    WalletCoin {
                        coin,
                        state: TxState::Confirmed { height },
                    },
                );
            }
        }
    }

    fn add_balance(&mut self, locked: bool, confirmed: bool, value: Amount) {
        let field = match (confirmed, locked) {
            (true, true) => &mut self.balance.locked_confirmed,
            (true, false) => &mut self.balance.confirmed,
            (false, true) => &mut self.balance.locked_unconfirmed,
            (false, false) => &mut self.balance.unconfirmed,
        };
        *field = field.checked_add(value).unwrap_or(*field);
    }

    fn sub_balance(&mut self, locked: bool, confirmed: bool, value: Amount) {
        let field = match (confirmed, locked) {
            (true, true) => &mut self.balance.locked_confirmed,
            (true, false) => &mut self.balance.confirmed,
            (false, true) => &mut self.balance.locked_unconfirmed,
            (false, false) => &mut self.balance.unconfirmed,
        };
        *field = field.checked_sub(value).unwrap_or(Amount::ZERO);
    }

    /// A conflicting incoming tx spends `outpoint`, already consumed by a
    /// pending wallet tx: erase that tx's outputs and, recursively, any
    /// further wallet tx that spent them (spec.md §4.C invariant 5).
    pub fn erase_conflicting_spend(&mut self, outpoint: &Outpoint) {
        let Some(spender_txid) = self.spent.get(outpoint).copied() else {
            return;
        };
        self.erase_tx_outputs(spender_txid);
    }

    fn erase_tx_outputs(&mut self, txid: Hash) {
        let outputs: Vec<Outpoint> = self
            .coins
            .keys()
            .filter(|op| op.hash == txid)
            .copied()
            .collect();
        for op in outputs {
            if let Some(next_spender) = self.spent.get(&op).copied() {
                self.erase_tx_outputs(next_spender);
            }
            self.erase(&op);
        }
    }

    /// Drops a coin entirely — a double-spend conflict or mempool eviction.
    pub fn erase(&mut self, outpoint: &Outpoint) {
        let was_spent = self.spent.remove(outpoint).is_some();
        if let Some(wc) = self.coins.remove(outpoint) {
            if !was_spent {
                let locked = wc.coin.covenant.ty.is_locking();
                let confirmed = matches!(wc.state, TxState::Confirmed { .. });
                self.sub_balance(locked, confirmed, wc.coin.value);
            }
        }
    }

    /// Records that `outpoint` was spent by `spender_txid`, so a later
    /// conflicting spend can find and erase the dependent chain. The spent
    /// coin's value leaves the balance the moment it's marked spent.
    pub fn spend(&mut self, outpoint: Outpoint, spender_txid: Hash) {
        if self.spent.insert(outpoint, spender_txid).is_none() {
            if let Some(wc) = self.coins.get(&outpoint) {
                let locked = wc.coin.covenant.ty.is_locking();
                let confirmed = matches!(wc.state, TxState::Confirmed { .. });
                self.sub_balance(locked, confirmed, wc.coin.value);
            }
        }
    }

    pub fn unspend(&mut self, outpoint: &Outpoint) {
        if self.spent.remove(outpoint).is_some() {
            if let Some(wc) = self.coins.get(outpoint) {
                let locked = wc.coin.covenant.ty.is_locking();
                let confirmed = matches!(wc.state, TxState::Confirmed { .. });
                self.add_balance(locked, confirmed, wc.coin.value);
            }
        }
    }

    pub fn upsert_name(&mut self, state: NameState) {
        self.names.insert(state.name_hash, state);
    }

    pub fn name(&self, hash: &NameHash) -> Option<&NameState> {
        self.names.get(hash)
    }

    /// Applies a confirmed block's relevant transactions: promotes any coin
    /// this wallet already tracked and folds in newly observed outputs.
    pub fn add_block(&mut self, height: u32, txs: &[(Transaction, Vec<(Outpoint, Coin)>)]) {
        self.tip = height;
        for (tx, new_outputs) in txs {
            let txid = tx.txid();
            for input in &tx.inputs {
                self.spend(input.prevout, txid);
            }
            for (outpoint, coin) in new_outputs {
                self.credit_confirmed(*outpoint, coin.clone(), height);
            }
            debug!(%txid, height, "applied confirmed tx to wallet txdb");
        }
    }

    /// Reverts a block: confirmed coins it created are erased, coins it
    /// spent are unspent, matching `undo_deltas`'s backward-application
    /// discipline in `hns-consensus`.
    pub fn remove_block(&mut self, height: u32, txs: &[(Transaction, Vec<Outpoint>)]) {
        for (tx, created) in txs {
            for outpoint in created {
                self.erase(outpoint);
            }
            for input in &tx.inputs {
                self.unspend(&input.prevout);
            }
        }
        self.tip = height.saturating_sub(1);
    }

    /// Reverts every block above `height` in one step — used by a reorg
    /// handler that has already computed the full list of blocks to undo.
    pub fn revert_to(&mut self, height: u32) {
        let stale: Vec<Outpoint> = self
            .coins
            .iter()
            .filter_map(|(op, c)| match c.state {
                TxState::Confirmed { height: h } if h > height => Some(*op),
                _ => None,
            })
            .collect();
        for op in stale {
            self.erase(&op);
        }
        self.tip = height;
    }

    /// Drops every unconfirmed coin — a full wallet rescan ("zap").
    pub fn zap(&mut self) {
        let unconfirmed: Vec<Outpoint> = self
            .coins
            .iter()
            .filter(|(_, c)| matches!(c.state, TxState::Unconfirmed))
            .map(|(op, _)| *op)
            .collect();
        for op in unconfirmed {
            self.erase(&op);
        }
    }

    /// Enforces the mempool ancestor-depth cap (spec.md §4.C invariant 4)
    /// before a new tx spending `prevouts` is accepted, and records its
    /// resulting depth for later descendants to look up.
    pub fn accept_ancestor_depth(&mut self, txid: Hash, prevouts: &[Outpoint]) -> Result<usize, WalletError> {
        let depth = self.ancestor_depth(prevouts);
        if depth > MEMPOOL_MAX_ANCESTORS {
            return Err(WalletError::TooManyAncestors);
        }
        self.record_ancestor_depth(txid, depth);
        Ok(depth)
    }

    /// Minimal greedy coin selection: largest-first over unspent, unlocked
    /// coins until `target` is covered.
    pub fn select_coins(&self, target: Amount) -> Result<Vec<(Outpoint, Coin)>, WalletError> {
        let mut candidates: Vec<(Outpoint, Coin)> = self
            .coins
            .iter()
            .filter(|(op, wc)| !self.spent.contains_key(*op) && !wc.coin.covenant.ty.is_locking())
            .map(|(op, wc)| (*op, wc.coin.clone()))
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.1.value));

        let mut picked = Vec::new();
        let mut total = Amount::ZERO;
        for (op, coin) in candidates {
            if total >= target {
                break;
            }
            total = total.checked_add(coin.value).map_err(|_| WalletError::InsufficientFunds { required: target })?;
            picked.push((op, coin));
        }
        if total < target {
            return Err(WalletError::InsufficientFunds { required: target });
        }
        Ok(picked)
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len() - self.spent.len().min(self.coins.len())
    }
}

pub fn build_address(public_key: &secp256k1::PublicKey) -> [u8; 20] {
    address_hash(public_key)
}

pub fn address_to_bech32(network: hns_crypto::Network, hash: &[u8; 20]) -> Result<String> {
    hns_crypto::encode_address(network, hash).map_err(|e| anyhow!(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hns_chain::{Covenant, CovenantType, Hash, TxInput, TxOutput};

    #[test]
    fn wallet_roundtrip() {
        let dir = std::env::temp_dir().join(format!("hns-wallet-test-{}", std::process::id()));
        let store = WalletStore::new(dir).unwrap();
        let (wallet, _kp) = store.create("test", "pass").unwrap();
        let secret = store.unlock_secret(&wallet, "pass").unwrap();
        assert_eq!(secret.len(), 32);
    }

    fn coin(value: i64, locking: bool) -> Coin {
        Coin {
            value: Amount::from_base_units(value).unwrap(),
            address: vec![],
            covenant: if locking {
                Covenant::new(CovenantType::Bid, vec![])
            } else {
                Covenant::none()
            },
            height: 0,
            coinbase: false,
        }
    }

    #[test]
    fn balance_separates_confirmed_and_locked() {
        let mut db = TxDb::new();
        let op1 = Outpoint::new(Hash::digest(b"a"), 0);
        let op2 = Outpoint::new(Hash::digest(b"b"), 0);
        db.insert_unconfirmed(op1, coin(1_000_000, false));
        db.confirm(&[(op1, coin(1_000_000, false))], 10, Hash::digest(b"block10")).unwrap();
        db.insert_unconfirmed(op2, coin(500_000, true));

        let balance = db.balance();
        assert_eq!(balance.confirmed.base_units(), 1_000_000);
        assert_eq!(balance.locked_unconfirmed.base_units(), 500_000);
        assert_eq!(balance.unconfirmed.base_units(), 0);
    }

    #[test]
    fn reorg_round_trip_restores_balance() {
        let mut db = TxDb::new();
        let op = Outpoint::new(Hash::digest(b"a"), 0);
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prevout: Outpoint::new(Hash::ZERO, 0),
                sequence: 0,
                witness: vec![],
            }],
            outputs: vec![TxOutput {
                value: Amount::from_base_units(1_000_000).unwrap(),
                address: vec![],
                covenant: Covenant::none(),
            }],
            locktime: 0,
        };
        db.add_block(5, &[(tx.clone(), vec![(op, coin(1_000_000, false))])]);
        assert_eq!(db.balance().confirmed.base_units(), 1_000_000);

        db.remove_block(5, &[(tx, vec![op])]);
        assert_eq!(db.balance(), Balance::default());
    }

    #[test]
    fn marks_on_first_confirm_and_clears_on_unconfirm() {
        let mut db = TxDb::new();
        let op = Outpoint::new(Hash::digest(b"a"), 0);
        db.insert_unconfirmed(op, coin(1_000_000, false));
        assert!(!db.marked());

        let block_hash = Hash::digest(b"block10");
        db.confirm(&[(op, coin(1_000_000, false))], 10, block_hash).unwrap();
        assert!(db.marked());
        assert_eq!(db.start(), (10, block_hash));

        db.unconfirm(op).unwrap();
        assert!(!db.marked());
    }

    #[test]
    fn ancestor_depth_grows_along_an_unconfirmed_chain_and_caps_it() {
        let mut db = TxDb::new();
        let mut prev = Outpoint::new(Hash::digest(b"root"), 0);
        db.insert_unconfirmed(prev, coin(1_000_000, false));

        for i in 0..MEMPOOL_MAX_ANCESTORS {
            let depth = db.ancestor_depth(&[prev]);
            assert_eq!(depth, i + 1);
            assert!(depth <= MEMPOOL_MAX_ANCESTORS);

            let txid = Hash::digest(format!("tx{i}").as_bytes());
            db.record_ancestor_depth(txid, depth);
            let next = Outpoint::new(txid, 0);
            db.insert_unconfirmed(next, coin(1_000_000, false));
            prev = next;
        }

        assert!(db.ancestor_depth(&[prev]) > MEMPOOL_MAX_ANCESTORS);
    }

    #[test]
    fn conflicting_spend_erases_tx_and_its_change_output() {
        let mut db = TxDb::new();
        let shared_input = Outpoint::new(Hash::digest(b"shared"), 0);
        db.insert_unconfirmed(shared_input, coin(2_000_000, false));

        // A pending wallet tx spends `shared_input` and creates a change
        // output plus a further spend of that change.
        let first_tx = Hash::digest(b"first");
        db.spend(shared_input, first_tx);
        let change = Outpoint::new(first_tx, 0);
        db.insert_unconfirmed(change, coin(900_000, false));

        let second_tx = Hash::digest(b"second");
        db.spend(change, second_tx);
        let grandchild = Outpoint::new(second_tx, 0);
        db.insert_unconfirmed(grandchild, coin(800_000, false));

        // A conflicting tx now claims `shared_input` first: erase the
        // whole dependent chain the wallet had pending.
        db.erase_conflicting_spend(&shared_input);
        assert!(!db.coins.contains_key(&change));
        assert!(!db.coins.contains_key(&grandchild));
    }

    #[test]
    fn address_gap_extends_on_late_discovery() {
        let mut gap = AddressGap::new(20);
        assert_eq!(gap.next, 0);
        gap.mark_used(5);
        assert_eq!(gap.next, 26);
        gap.mark_used(3);
        assert_eq!(gap.next, 26);
        assert_eq!(gap.highest_used, Some(5));
    }

    fn covenant_coin(value: i64, ty: CovenantType) -> Coin {
        Coin {
            value: Amount::from_base_units(value).unwrap(),
            address: vec![],
            covenant: if ty == CovenantType::None {
                Covenant::none()
            } else {
                Covenant::new(ty, vec![])
            },
            height: 0,
            coinbase: false,
        }
    }

    fn tx(inputs: Vec<Outpoint>, outputs: Vec<(i64, CovenantType)>) -> Transaction {
        Transaction {
            version: 1,
            inputs: inputs
                .into_iter()
                .map(|prevout| TxInput {
                    prevout,
                    sequence: 0,
                    witness: vec![],
                })
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|(value, ty)| TxOutput {
                    value: Amount::from_base_units(value).unwrap(),
                    address: vec![],
                    covenant: if ty == CovenantType::None {
                        Covenant::none()
                    } else {
                        Covenant::new(ty, vec![])
                    },
                })
                .collect(),
            locktime: 0,
        }
    }

    /// BID→REVEAL cross-account: two accounts D and A, each funded
    /// 10,000,000. D places a bid, then the reveal output is re-routed to
    /// A. Balances move only by the deltas of the touched outputs, and
    /// unwinding both blocks (a reorg handler's per-block undo) plus a zap
    /// restores both accounts to their starting balance.
    #[test]
    fn bid_then_reveal_cross_account_round_trips_on_revert_s1() {
        let mut d = TxDb::new();
        let mut a = TxDb::new();

        let genesis_d = Outpoint::new(Hash::digest(b"genesis-d"), 0);
        let genesis_a = Outpoint::new(Hash::digest(b"genesis-a"), 0);
        d.credit_confirmed(genesis_d, covenant_coin(10_000_000, CovenantType::None), 0);
        a.credit_confirmed(genesis_a, covenant_coin(10_000_000, CovenantType::None), 0);
        assert_eq!(d.balance().confirmed.base_units(), 10_000_000);
        assert_eq!(a.balance().confirmed.base_units(), 10_000_000);

        // BID: spend the genesis coin, lock `blind` on D, change back unlocked.
        let blind = 2_000_000;
        let bid_tx = tx(vec![genesis_d], vec![(8_000_000, CovenantType::None), (blind, CovenantType::Bid)]);
        let bid_txid = bid_tx.txid();
        let change_out = Outpoint::new(bid_txid, 0);
        let bid_out = Outpoint::new(bid_txid, 1);
        d.add_block(
            10,
            &[(
                bid_tx.clone(),
                vec![
                    (change_out, covenant_coin(8_000_000, CovenantType::None)),
                    (bid_out, covenant_coin(blind, CovenantType::Bid)),
                ],
            )],
        );
        assert_eq!(d.balance().confirmed.base_units(), 8_000_000);
        assert_eq!(d.balance().locked_confirmed.base_units(), blind);

        // REVEAL: spend the BID output, lock the real value on A, refund
        // the blind/value difference back to D as unlocked change.
        let value = 500_000;
        let reveal_tx = tx(vec![bid_out], vec![(blind - value, CovenantType::None), (value, CovenantType::Reveal)]);
        let reveal_txid = reveal_tx.txid();
        let refund_out = Outpoint::new(reveal_txid, 0);
        let reveal_out = Outpoint::new(reveal_txid, 1);
        d.add_block(11, &[(reveal_tx.clone(), vec![(refund_out, covenant_coin(blind - value, CovenantType::None))])]);
        a.add_block(11, &[(reveal_tx.clone(), vec![(reveal_out, covenant_coin(value, CovenantType::Reveal))])]);

        assert_eq!(d.balance().confirmed.base_units(), 8_000_000 + (blind - value));
        assert_eq!(d.balance().locked_confirmed.base_units(), 0);
        assert_eq!(a.balance().confirmed.base_units(), 10_000_000);
        assert_eq!(a.balance().locked_confirmed.base_units(), value);

        let total_before = d.balance().confirmed.checked_add(d.balance().locked_confirmed).unwrap()
            + a.balance().confirmed.checked_add(a.balance().locked_confirmed).unwrap();
        assert_eq!(total_before.base_units(), 20_000_000);

        // Unwind both blocks and zap: both accounts land back at their
        // starting balance.
        d.remove_block(11, &[(reveal_tx.clone(), vec![refund_out])]);
        a.remove_block(11, &[(reveal_tx, vec![reveal_out])]);
        d.remove_block(10, &[(bid_tx, vec![change_out, bid_out])]);
        d.zap();
        a.zap();

        assert_eq!(d.balance().confirmed.base_units(), 10_000_000);
        assert_eq!(d.balance().locked_confirmed.base_units(), 0);
        assert_eq!(a.balance().confirmed.base_units(), 10_000_000);
        assert_eq!(a.balance().locked_confirmed.base_units(), 0);
    }
}
