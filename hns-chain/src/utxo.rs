use crate::amount::Amount;
use crate::covenant::Covenant;
use crate::outpoint::Outpoint;
use serde::{Deserialize, Serialize};

/// `(Outpoint, {value, address, covenant, height, coinbase})`. The coin set
/// is content-addressed by outpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub value: Amount,
    pub address: Vec<u8>,
    pub covenant: Covenant,
    pub height: u32,
    pub coinbase: bool,
}

/// Read-only lookup of `Outpoint -> Coin`, shared by the covenant engine and
/// the miner's template builder instead of each inventing its own lookup
/// closure (mirrors the teacher's injected-capability trait seam).
pub trait CoinView {
    fn get_coin(&self, outpoint: &Outpoint) -> Option<&Coin>;
}

impl CoinView for std::collections::HashMap<Outpoint, Coin> {
    fn get_coin(&self, outpoint: &Outpoint) -> Option<&Coin> {
        self.get(outpoint)
    }
}
