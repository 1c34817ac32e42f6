use blake2::digest::consts::U20;
use blake2::{Blake2b, Digest};
use hns_chain::Hash;
use rand::rngs::OsRng;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

type Blake2b160 = Blake2b<U20>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secp256k1 key material")]
    BadKey,
    #[error("signature verification failed")]
    BadSignature,
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

pub fn generate_keypair() -> KeyPair {
    let secp = Secp256k1::new();
    let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
    KeyPair {
        secret_key,
        public_key,
    }
}

pub fn sign(secret_key: &SecretKey, msg: &[u8]) -> ecdsa::Signature {
    let secp = Secp256k1::signing_only();
    let digest = Hash::digest(msg);
    let message = Message::from_digest(*digest.as_bytes());
    secp.sign_ecdsa(&message, secret_key)
}

pub fn verify(
    public_key: &PublicKey,
    msg: &[u8],
    sig: &ecdsa::Signature,
) -> Result<(), CryptoError> {
    let secp = Secp256k1::verification_only();
    let digest = Hash::digest(msg);
    let message = Message::from_digest(*digest.as_bytes());
    secp.verify_ecdsa(&message, sig, public_key)
        .map_err(|_| CryptoError::BadSignature)
}

/// Address hash: BLAKE2b-160 of the compressed public key.
pub fn address_hash(public_key: &PublicKey) -> [u8; 20] {
    let mut hasher = Blake2b160::new();
    hasher.update(public_key.serialize());
    let out = hasher.finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&out);
    bytes
}

/// Diffie-Hellman over secp256k1, as used by the `_XK` Noise pattern:
/// `x * P` for local secret `x` and remote point `P`, returning the
/// compressed-point x-coordinate.
pub fn ecdh(secret_key: &SecretKey, public_key: &PublicKey) -> [u8; 32] {
    let shared = secp256k1::ecdh::SharedSecret::new(public_key, secret_key);
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.as_ref());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = generate_keypair();
        let msg = b"hello world";
        let sig = sign(&kp.secret_key, msg);
        verify(&kp.public_key, msg, &sig).unwrap();
    }

    #[test]
    fn ecdh_is_symmetric() {
        let a = generate_keypair();
        let b = generate_keypair();
        let shared_a = ecdh(&a.secret_key, &b.public_key);
        let shared_b = ecdh(&b.secret_key, &a.public_key);
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn address_hash_is_20_bytes() {
        let kp = generate_keypair();
        assert_eq!(address_hash(&kp.public_key).len(), 20);
    }
}
