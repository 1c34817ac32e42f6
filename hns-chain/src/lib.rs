//! Shared primitives for a Handshake-style full node: hashes, amounts,
//! covenants, name state, block headers, and the string/IP compressors used
//! to encode resource records. Every other crate in the workspace builds on
//! top of this one, the way `dxid-core` is the one shared vocabulary the
//! rest of the teacher's crates import.

pub mod amount;
pub mod compress;
pub mod covenant;
pub mod hash;
pub mod header;
pub mod name;
pub mod outpoint;
pub mod params;
pub mod tx;
pub mod utxo;

pub use amount::{Amount, AmountError, COIN, MAX_MONEY};
pub use covenant::{Covenant, CovenantCodecError, CovenantType};
pub use hash::{merkle_root_checked, name_hash, verify_merkle_proof, Hash, MerkleTree, NameHash};
pub use header::{compact_to_target, meets_target, BlockHeader, HeaderCodecError, HEADER_SIZE, NONCE_POS};
pub use name::{AuctionState, NameDelta, NameState};
pub use outpoint::Outpoint;
pub use params::NetworkParams;
pub use tx::{Transaction, TxInput, TxOutput};
pub use utxo::{Coin, CoinView};
