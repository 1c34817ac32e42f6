//! The framed stream used once the handshake completes (spec.md §4.D):
//! each message is `[4-byte length][16-byte length-tag][payload][16-byte
//! payload-tag]`, both tags fresh ChaCha20-Poly1305 outputs under the send
//! cipher. Reads are two-phase: a 20-byte header first, then `size + 16`
//! bytes of payload.

use hns_crypto::CipherState;
use thiserror::Error;

/// 8 MiB, per spec.md §4.D.
pub const MAX_MESSAGE: usize = 8 * 1024 * 1024;

pub const HEADER_SIZE: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared payload size {0} exceeds MAX_MESSAGE")]
    BadPacketSize(usize),
    #[error("AEAD tag did not verify")]
    BadTag,
}

/// Encrypts `payload` into the wire framing: length header (encrypted and
/// tagged on its own) followed by the encrypted payload and its tag.
pub fn encode_message(send: &mut CipherState, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_MESSAGE {
        return Err(FrameError::BadPacketSize(payload.len()));
    }
    let mut len_buf = (payload.len() as u32).to_be_bytes().to_vec();
    let len_tag = send.encrypt(&[], &mut len_buf);

    let mut payload_buf = payload.to_vec();
    let payload_tag = send.encrypt(&[], &mut payload_buf);

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + 16);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(&len_tag);
    out.extend_from_slice(&payload_buf);
    out.extend_from_slice(&payload_tag);
    Ok(out)
}

/// Decrypts the 20-byte header, returning the declared payload size.
pub fn decode_header(recv: &mut CipherState, header: &[u8; HEADER_SIZE]) -> Result<usize, FrameError> {
    let mut len_buf = header[0..4].to_vec();
    let tag: [u8; 16] = header[4..20].try_into().unwrap();
    recv.decrypt(&[], &mut len_buf, &tag).map_err(|_| FrameError::BadTag)?;
    let size = u32::from_be_bytes(len_buf.try_into().unwrap()) as usize;
    if size > MAX_MESSAGE {
        return Err(FrameError::BadPacketSize(size));
    }
    Ok(size)
}

/// Decrypts the `size + 16` payload body that follows a decoded header.
pub fn decode_payload(recv: &mut CipherState, size: usize, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    if body.len() != size + 16 {
        return Err(FrameError::BadPacketSize(body.len()));
    }
    let mut payload = body[0..size].to_vec();
    let tag: [u8; 16] = body[size..size + 16].try_into().unwrap();
    recv.decrypt(&[], &mut payload, &tag).map_err(|_| FrameError::BadTag)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let mut send = CipherState::new([1u8; 32], [2u8; 32]);
        let mut recv = send.clone();
        let wire = encode_message(&mut send, b"hello peer").unwrap();

        let header: [u8; HEADER_SIZE] = wire[0..HEADER_SIZE].try_into().unwrap();
        let size = decode_header(&mut recv, &header).unwrap();
        let payload = decode_payload(&mut recv, size, &wire[HEADER_SIZE..]).unwrap();
        assert_eq!(payload, b"hello peer");
    }

    #[test]
    fn oversized_payload_is_rejected_before_encryption() {
        let mut send = CipherState::new([1u8; 32], [2u8; 32]);
        let big = vec![0u8; MAX_MESSAGE + 1];
        assert_eq!(encode_message(&mut send, &big), Err(FrameError::BadPacketSize(MAX_MESSAGE + 1)));
    }

    #[test]
    fn tampered_header_tag_is_rejected() {
        let mut send = CipherState::new([1u8; 32], [2u8; 32]);
        let mut recv = send.clone();
        let mut wire = encode_message(&mut send, b"hi").unwrap();
        wire[0] ^= 0xff;
        let header: [u8; HEADER_SIZE] = wire[0..HEADER_SIZE].try_into().unwrap();
        assert_eq!(decode_header(&mut recv, &header), Err(FrameError::BadTag));
    }
}
