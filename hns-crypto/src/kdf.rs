use hkdf::Hkdf;
use sha2::Sha256;

/// `HKDF(ck, ikm) -> (ck', k)`: two 32-byte outputs, as used at each
/// Brontide handshake step (spec.md §4.D).
pub fn hkdf2(chaining_key: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), ikm);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm).expect("64 bytes is a valid HKDF length");
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    a.copy_from_slice(&okm[0..32]);
    b.copy_from_slice(&okm[32..64]);
    (a, b)
}

/// `HKDF-Expand-64(oldKey, salt=oldSalt, info=empty)` used for Brontide key
/// rotation: returns `(saltNew, keyNew)`.
pub fn hkdf_expand_64(key: &[u8; 32], salt: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), key);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm).expect("64 bytes is a valid HKDF length");
    let mut salt_new = [0u8; 32];
    let mut key_new = [0u8; 32];
    salt_new.copy_from_slice(&okm[0..32]);
    key_new.copy_from_slice(&okm[32..64]);
    (salt_new, key_new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf2_is_deterministic() {
        let ck = [1u8; 32];
        let ikm = b"shared secret";
        let (a1, b1) = hkdf2(&ck, ikm);
        let (a2, b2) = hkdf2(&ck, ikm);
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert_ne!(a1, b1);
    }

    #[test]
    fn rotation_changes_key_and_salt() {
        let key = [2u8; 32];
        let salt = [3u8; 32];
        let (salt_new, key_new) = hkdf_expand_64(&key, &salt);
        assert_ne!(salt_new, salt);
        assert_ne!(key_new, key);
    }
}
