//! Crypto primitives shared by the consensus, wallet, and net crates:
//! secp256k1 keys/ECDH/signing, HKDF, the ChaCha20-Poly1305 cipher state
//! Brontide rotates, and bech32 address encoding. Hashing itself (BLAKE2b)
//! lives in `hns-chain` since every crate — not just the crypto-heavy ones —
//! needs it.

pub mod address;
pub mod aead;
pub mod kdf;
pub mod keys;

pub use address::{decode_address, encode_address, AddressError, Network};
pub use aead::{CipherError, CipherState, ROTATION_INTERVAL};
pub use kdf::{hkdf2, hkdf_expand_64};
pub use keys::{address_hash, ecdh, generate_keypair, sign, verify, CryptoError, KeyPair};
