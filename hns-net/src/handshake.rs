//! The Brontide handshake: `Noise_XK_secp256k1_ChaChaPoly_SHA256` with
//! prologue `"hns"` (spec.md §4.D). Three acts of 50/50/66 bytes; any tag
//! mismatch, bad version byte, or invalid point aborts the session.

use hns_crypto::{ecdh, hkdf2, CipherState};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

const PROLOGUE: &[u8] = b"hns";
const VERSION: u8 = 0;

pub const ACT_ONE_SIZE: usize = 50;
pub const ACT_TWO_SIZE: usize = 50;
pub const ACT_THREE_SIZE: usize = 66;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unexpected act version byte {0}")]
    BadVersion(u8),
    #[error("AEAD tag did not verify during the handshake")]
    BadTag,
    #[error("remote supplied an invalid secp256k1 point")]
    BadPoint,
    #[error("act buffer has the wrong length")]
    BadLength,
    #[error("act received out of order")]
    OutOfOrder,
}

/// Running symmetric state shared by both handshake roles: a chaining key,
/// a running transcript hash, and the cipher key derived by the most
/// recent `mix_key` — per the Noise token rules, a message's `s`/payload
/// token is encrypted under whatever key the *previous* DH token produced,
/// so the key must persist across calls rather than being threaded in by
/// the caller.
struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    k: [u8; 32],
}

impl SymmetricState {
    fn new(responder_static: &PublicKey) -> Self {
        let h0: [u8; 32] = Sha256::digest(PROLOGUE).into();
        let mut state = SymmetricState { ck: h0, h: h0, k: [0u8; 32] };
        state.mix_hash(&responder_static.serialize());
        state
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.h);
        hasher.update(data);
        self.h = hasher.finalize().into();
    }

    fn mix_key(&mut self, ikm: &[u8]) {
        let (ck, k) = hkdf2(&self.ck, ikm);
        self.ck = ck;
        self.k = k;
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> ([u8; 16], Vec<u8>) {
        let mut cipher = CipherState::new(self.k, self.ck);
        let mut buf = plaintext.to_vec();
        let tag = cipher.encrypt(&self.h, &mut buf);
        self.mix_hash(&tag);
        (tag, buf)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8], tag: &[u8; 16]) -> Result<Vec<u8>, HandshakeError> {
        let mut cipher = CipherState::new(self.k, self.ck);
        let mut buf = ciphertext.to_vec();
        cipher
            .decrypt(&self.h, &mut buf, tag)
            .map_err(|_| HandshakeError::BadTag)?;
        self.mix_hash(tag);
        Ok(buf)
    }
}

fn parse_point(bytes: &[u8]) -> Result<PublicKey, HandshakeError> {
    PublicKey::from_slice(bytes).map_err(|_| HandshakeError::BadPoint)
}

/// Send/recv cipher pair produced once the handshake completes, already
/// oriented for this side of the connection.
pub struct BrontideKeys {
    pub send: CipherState,
    pub recv: CipherState,
}

/// The initiator knows the responder's static key up front (the `_XK`
/// pattern). Drives acts one and three; consumes act two in between.
pub struct Initiator {
    local_secret: SecretKey,
    local_ephemeral: SecretKey,
    remote_static: PublicKey,
    remote_ephemeral: Option<PublicKey>,
    state: SymmetricState,
}

impl Initiator {
    pub fn new(local_secret: SecretKey, remote_static: PublicKey) -> Self {
        let local_ephemeral = SecretKey::new(&mut rand::thread_rng());
        let state = SymmetricState::new(&remote_static);
        Initiator {
            local_secret,
            local_ephemeral,
            remote_static,
            remote_ephemeral: None,
            state,
        }
    }

    /// Act One: `[version][pub(e)][tag over empty AEAD]`, mixing the `es`
    /// term (initiator ephemeral against the known responder static key).
    pub fn act_one(&mut self) -> [u8; ACT_ONE_SIZE] {
        let secp = Secp256k1::new();
        let e_pub = PublicKey::from_secret_key(&secp, &self.local_ephemeral);
        self.state.mix_hash(&e_pub.serialize());
        let shared_es = ecdh(&self.local_ephemeral, &self.remote_static);
        self.state.mix_key(&shared_es);
        let (tag, _) = self.state.encrypt_and_hash(&[]);

        let mut out = [0u8; ACT_ONE_SIZE];
        out[0] = VERSION;
        out[1..34].copy_from_slice(&e_pub.serialize());
        out[34..50].copy_from_slice(&tag);
        out
    }

    /// Act Two: `[version][pub(re)][tag]`, mixing the `ee` term (both
    /// ephemeral keys).
    pub fn recv_act_two(&mut self, act_two: &[u8]) -> Result<(), HandshakeError> {
        if act_two.len() != ACT_TWO_SIZE {
            return Err(HandshakeError::BadLength);
        }
        if act_two[0] != VERSION {
            return Err(HandshakeError::BadVersion(act_two[0]));
        }
        let re = parse_point(&act_two[1..34])?;
        let tag: [u8; 16] = act_two[34..50].try_into().unwrap();

        self.state.mix_hash(&re.serialize());
        let shared_ee = ecdh(&self.local_ephemeral, &re);
        self.state.mix_key(&shared_ee);
        self.state.decrypt_and_hash(&[], &tag)?;
        self.remote_ephemeral = Some(re);
        Ok(())
    }

    /// Act Three: `[version][enc(pub(s))][tag1][enc(empty)][tag2]`. Per the
    /// Noise `s, se` tokens, `s` is encrypted under the still-current `ee`
    /// key *before* the `se` term (initiator static against responder
    /// ephemeral) is mixed in for the trailing empty payload. Splits into
    /// (send, recv) from the initiator's side.
    pub fn act_three(mut self) -> Result<([u8; ACT_THREE_SIZE], BrontideKeys), HandshakeError> {
        let re = self.remote_ephemeral.ok_or(HandshakeError::OutOfOrder)?;
        let secp = Secp256k1::new();
        let s_pub = PublicKey::from_secret_key(&secp, &self.local_secret);

        let (tag1, enc_s) = self.state.encrypt_and_hash(&s_pub.serialize());

        let shared_se = ecdh(&self.local_secret, &re);
        self.state.mix_key(&shared_se);
        let (tag2, _) = self.state.encrypt_and_hash(&[]);

        let mut out = [0u8; ACT_THREE_SIZE];
        out[0] = VERSION;
        out[1..34].copy_from_slice(&enc_s);
        out[34..50].copy_from_slice(&tag1);
        out[50..66].copy_from_slice(&tag2);

        let (h1, h2) = hkdf2(&self.state.ck, &[]);
        let keys = BrontideKeys {
            send: CipherState::new(h1, self.state.ck),
            recv: CipherState::new(h2, self.state.ck),
        };
        Ok((out, keys))
    }
}

/// The responder answers with its own static key already fixed; drives act
/// two and consumes acts one and three.
pub struct Responder {
    local_secret: SecretKey,
    local_ephemeral: SecretKey,
    remote_ephemeral: Option<PublicKey>,
    state: SymmetricState,
}

impl Responder {
    pub fn new(local_secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let local_public = PublicKey::from_secret_key(&secp, &local_secret);
        let local_ephemeral = SecretKey::new(&mut rand::thread_rng());
        let state = SymmetricState::new(&local_public);
        Responder {
            local_secret,
            local_ephemeral,
            remote_ephemeral: None,
            state,
        }
    }

    /// Consumes Act One, mixing the `es` term (initiator ephemeral against
    /// this responder's own static key).
    pub fn recv_act_one(&mut self, act_one: &[u8]) -> Result<(), HandshakeError> {
        if act_one.len() != ACT_ONE_SIZE {
            return Err(HandshakeError::BadLength);
        }
        if act_one[0] != VERSION {
            return Err(HandshakeError::BadVersion(act_one[0]));
        }
        let e = parse_point(&act_one[1..34])?;
        let tag: [u8; 16] = act_one[34..50].try_into().unwrap();

        self.state.mix_hash(&e.serialize());
        let shared_es = ecdh(&self.local_secret, &e);
        self.state.mix_key(&shared_es);
        self.state.decrypt_and_hash(&[], &tag)?;
        self.remote_ephemeral = Some(e);
        Ok(())
    }

    /// Act Two: `[version][pub(re)][tag]`, mixing the `ee` term.
    pub fn act_two(&mut self) -> Result<[u8; ACT_TWO_SIZE], HandshakeError> {
        let e = self.remote_ephemeral.ok_or(HandshakeError::OutOfOrder)?;
        let secp = Secp256k1::new();
        let re_pub = PublicKey::from_secret_key(&secp, &self.local_ephemeral);
        self.state.mix_hash(&re_pub.serialize());
        let shared_ee = ecdh(&self.local_ephemeral, &e);
        self.state.mix_key(&shared_ee);
        let (tag, _) = self.state.encrypt_and_hash(&[]);

        let mut out = [0u8; ACT_TWO_SIZE];
        out[0] = VERSION;
        out[1..34].copy_from_slice(&re_pub.serialize());
        out[34..50].copy_from_slice(&tag);
        Ok(out)
    }

    /// Consumes Act Three, recovering the initiator's static key and
    /// splitting into (send, recv) keys from the responder's side — the
    /// reverse orientation of the initiator's split. `s` decrypts under the
    /// still-current `ee` key; `se` (here `ecdh(local_ephemeral, remote
    /// static)`, the mirror of the initiator's `ecdh(local_secret, re)`) is
    /// only mixed in afterwards, for the trailing empty payload.
    pub fn recv_act_three(mut self, act_three: &[u8]) -> Result<(PublicKey, BrontideKeys), HandshakeError> {
        if act_three.len() != ACT_THREE_SIZE {
            return Err(HandshakeError::BadLength);
        }
        if act_three[0] != VERSION {
            return Err(HandshakeError::BadVersion(act_three[0]));
        }
        let enc_s = &act_three[1..34];
        let tag1: [u8; 16] = act_three[34..50].try_into().unwrap();
        let tag2: [u8; 16] = act_three[50..66].try_into().unwrap();

        let s_bytes = self.state.decrypt_and_hash(enc_s, &tag1)?;
        let remote_static = parse_point(&s_bytes)?;

        let shared_se = ecdh(&self.local_ephemeral, &remote_static);
        self.state.mix_key(&shared_se);
        self.state.decrypt_and_hash(&[], &tag2)?;

        let (h1, h2) = hkdf2(&self.state.ck, &[]);
        let keys = BrontideKeys {
            send: CipherState::new(h2, self.state.ck),
            recv: CipherState::new(h1, self.state.ck),
        };
        Ok((remote_static, keys))
    }
}
