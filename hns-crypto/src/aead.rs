use crate::kdf::hkdf_expand_64;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use thiserror::Error;

/// Number of AEAD operations before the key is rotated (spec.md §4.D).
pub const ROTATION_INTERVAL: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("AEAD tag verification failed")]
    BadTag,
}

/// One direction's symmetric state: a key, a salt used for rotation, and a
/// 12-byte IV whose low 4 bytes (offset 4) are a little-endian op counter.
/// Held twice inside a `Brontide` value (send/recv), never sharing a
/// counter across directions (spec.md §5).
#[derive(Clone)]
pub struct CipherState {
    key: [u8; 32],
    salt: [u8; 32],
    counter: u32,
}

impl CipherState {
    pub fn new(key: [u8; 32], salt: [u8; 32]) -> Self {
        CipherState {
            key,
            salt,
            counter: 0,
        }
    }

    fn nonce(&self) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..8].copy_from_slice(&self.counter.to_le_bytes());
        Nonce::clone_from_slice(&bytes)
    }

    fn maybe_rotate(&mut self) {
        if self.counter == ROTATION_INTERVAL {
            let (salt_new, key_new) = hkdf_expand_64(&self.key, &self.salt);
            self.salt = salt_new;
            self.key = key_new;
            self.counter = 0;
        }
    }

    /// Encrypts `plaintext` in place, returning the 16-byte tag. Advances
    /// the counter and rotates the key after exactly `ROTATION_INTERVAL` ops.
    pub fn encrypt(&mut self, aad: &[u8], buf: &mut [u8]) -> [u8; 16] {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = self.nonce();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, aad, buf)
            .expect("chacha20poly1305 encryption cannot fail for valid lengths");
        self.counter += 1;
        self.maybe_rotate();
        let mut out = [0u8; 16];
        out.copy_from_slice(&tag);
        out
    }

    /// Decrypts `buf` in place against `tag`. On a tag mismatch the cipher
    /// state does not advance — the caller must close the session
    /// (spec.md §4.D: "a decryptor that cannot advance closes the session").
    pub fn decrypt(&mut self, aad: &[u8], buf: &mut [u8], tag: &[u8; 16]) -> Result<(), CipherError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = self.nonce();
        cipher
            .decrypt_in_place_detached(&nonce, aad, buf, Tag::from_slice(tag))
            .map_err(|_| CipherError::BadTag)?;
        self.counter += 1;
        self.maybe_rotate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let mut send = CipherState::new([1u8; 32], [2u8; 32]);
        let mut recv = send.clone();
        let mut buf = b"hello".to_vec();
        let tag = send.encrypt(&[], &mut buf);
        recv.decrypt(&[], &mut buf, &tag).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn bit_flip_fails_tag_verification() {
        let mut send = CipherState::new([1u8; 32], [2u8; 32]);
        let mut recv = send.clone();
        let mut buf = b"hello".to_vec();
        let tag = send.encrypt(&[], &mut buf);
        buf[0] ^= 0x01;
        assert_eq!(recv.decrypt(&[], &mut buf, &tag), Err(CipherError::BadTag));
    }

    #[test]
    fn rotates_after_1000_operations() {
        let mut send = CipherState::new([9u8; 32], [8u8; 32]);
        let key_before = send.key;
        for _ in 0..ROTATION_INTERVAL {
            let mut buf = b"x".to_vec();
            send.encrypt(&[], &mut buf);
        }
        assert_eq!(send.counter, 0);
        assert_ne!(send.key, key_before);
    }

    #[test]
    fn send_and_recv_directions_do_not_share_counters() {
        let mut send = CipherState::new([1u8; 32], [2u8; 32]);
        let recv = CipherState::new([3u8; 32], [4u8; 32]);
        let mut buf = b"abc".to_vec();
        send.encrypt(&[], &mut buf);
        assert_eq!(send.counter, 1);
        assert_eq!(recv.counter, 0);
    }
}
