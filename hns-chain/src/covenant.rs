use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Covenant tag. Arity and semantics of `items` are defined per tag in
/// spec.md §3/§4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CovenantType {
    None = 0,
    Claim = 1,
    Open = 2,
    Bid = 3,
    Reveal = 4,
    Redeem = 5,
    Register = 6,
    Update = 7,
    Renew = 8,
    Transfer = 9,
    Finalize = 10,
    Revoke = 11,
}

impl CovenantType {
    pub fn from_u8(b: u8) -> Option<Self> {
        use CovenantType::*;
        Some(match b {
            0 => None,
            1 => Claim,
            2 => Open,
            3 => Bid,
            4 => Reveal,
            5 => Redeem,
            6 => Register,
            7 => Update,
            8 => Renew,
            9 => Transfer,
            10 => Finalize,
            11 => Revoke,
            _ => return Option::None,
        })
    }

    /// Covenants that hold a UTXO locked (spec.md §4.C): BID, REVEAL,
    /// REGISTER, UPDATE, RENEW, TRANSFER, FINALIZE.
    pub fn is_locking(self) -> bool {
        matches!(
            self,
            CovenantType::Bid
                | CovenantType::Reveal
                | CovenantType::Register
                | CovenantType::Update
                | CovenantType::Renew
                | CovenantType::Transfer
                | CovenantType::Finalize
        )
    }
}

/// A tagged sequence of byte-string items attached to an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Covenant {
    pub ty: CovenantType,
    pub items: Vec<Vec<u8>>,
}

impl Covenant {
    pub fn none() -> Self {
        Covenant {
            ty: CovenantType::None,
            items: Vec::new(),
        }
    }

    pub fn new(ty: CovenantType, items: Vec<Vec<u8>>) -> Self {
        Covenant { ty, items }
    }

    pub fn is_none(&self) -> bool {
        self.ty == CovenantType::None
    }

    /// Wire format: `type:u8 | varint(itemCount) | (varBytes item)*`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.ty as u8);
        write_varint(&mut out, self.items.len() as u64);
        for item in &self.items {
            write_varint(&mut out, item.len() as u64);
            out.extend_from_slice(item);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CovenantCodecError> {
        let mut cursor = Cursor::new(buf);
        let ty_byte = cursor.read_u8()?;
        let ty = CovenantType::from_u8(ty_byte).ok_or(CovenantCodecError::BadType(ty_byte))?;
        let count = cursor.read_varint()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = cursor.read_varint()?;
            items.push(cursor.read_bytes(len as usize)?.to_vec());
        }
        Ok(Covenant { ty, items })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CovenantCodecError {
    #[error("unexpected end of covenant buffer")]
    Truncated,
    #[error("unknown covenant type byte {0}")]
    BadType(u8),
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, CovenantCodecError> {
        let b = *self.buf.get(self.pos).ok_or(CovenantCodecError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CovenantCodecError> {
        let end = self.pos.checked_add(n).ok_or(CovenantCodecError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(CovenantCodecError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_varint(&mut self) -> Result<u64, CovenantCodecError> {
        let first = self.read_u8()?;
        Ok(match first {
            0xfd => {
                let b = self.read_bytes(2)?;
                u16::from_le_bytes([b[0], b[1]]) as u64
            }
            0xfe => {
                let b = self.read_bytes(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64
            }
            0xff => {
                let b = self.read_bytes(8)?;
                u64::from_le_bytes(b.try_into().unwrap())
            }
            n => n as u64,
        })
    }
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_bid_covenant() {
        let cov = Covenant::new(
            CovenantType::Bid,
            vec![b"namehash".to_vec(), vec![0, 0, 0, 1], b"example".to_vec(), b"blind".to_vec()],
        );
        let encoded = cov.encode();
        let decoded = Covenant::decode(&encoded).unwrap();
        assert_eq!(cov, decoded);
    }

    #[test]
    fn rejects_unknown_type() {
        let bytes = [200u8, 0];
        assert_eq!(
            Covenant::decode(&bytes).unwrap_err(),
            CovenantCodecError::BadType(200)
        );
    }

    #[test]
    fn locking_classification() {
        assert!(CovenantType::Bid.is_locking());
        assert!(CovenantType::Finalize.is_locking());
        assert!(!CovenantType::None.is_locking());
        assert!(!CovenantType::Redeem.is_locking());
    }
}
