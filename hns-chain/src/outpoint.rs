use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// `(Hash, u32 index)` — identifies a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub hash: Hash,
    pub index: u32,
}

impl Outpoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Outpoint { hash, index }
    }
}
