use bech32::{self, FromBase32, ToBase32, Variant};
use thiserror::Error;

/// bech32 HRPs per spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn hrp(self) -> &'static str {
        match self {
            Network::Main => "hs",
            Network::Test => "ts",
            Network::Regtest => "rs",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("bech32 decode error: {0}")]
    Decode(String),
    #[error("unexpected hrp {0}")]
    WrongHrp(String),
    #[error("unsupported witness version {0}")]
    Version(u8),
    #[error("hash must be 20 (p2pkh/p2sh) or 32 (p2wsh) bytes, got {0}")]
    HashLength(usize),
}

/// version 0; 20-byte (p2pkh/p2sh) or 32-byte (p2wsh) hash.
pub fn encode_address(network: Network, hash: &[u8]) -> Result<String, AddressError> {
    if hash.len() != 20 && hash.len() != 32 {
        return Err(AddressError::HashLength(hash.len()));
    }
    let mut data = vec![bech32::u5::try_from_u8(0).unwrap()];
    data.extend(hash.to_base32());
    bech32::encode(network.hrp(), data, Variant::Bech32)
        .map_err(|e| AddressError::Decode(e.to_string()))
}

pub fn decode_address(network: Network, addr: &str) -> Result<Vec<u8>, AddressError> {
    let (hrp, data, _variant) =
        bech32::decode(addr).map_err(|e| AddressError::Decode(e.to_string()))?;
    if hrp != network.hrp() {
        return Err(AddressError::WrongHrp(hrp));
    }
    let version = data[0].to_u8();
    if version != 0 {
        return Err(AddressError::Version(version));
    }
    let hash = Vec::<u8>::from_base32(&data[1..]).map_err(|e| AddressError::Decode(e.to_string()))?;
    if hash.len() != 20 && hash.len() != 32 {
        return Err(AddressError::HashLength(hash.len()));
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_p2pkh() {
        let hash = [7u8; 20];
        let addr = encode_address(Network::Main, &hash).unwrap();
        assert!(addr.starts_with("hs1"));
        let decoded = decode_address(Network::Main, &addr).unwrap();
        assert_eq!(decoded, hash);
    }

    #[test]
    fn roundtrip_p2wsh() {
        let hash = [9u8; 32];
        let addr = encode_address(Network::Test, &hash).unwrap();
        assert!(addr.starts_with("ts1"));
        let decoded = decode_address(Network::Test, &addr).unwrap();
        assert_eq!(decoded, hash);
    }

    #[test]
    fn rejects_wrong_network_hrp() {
        let hash = [1u8; 20];
        let addr = encode_address(Network::Main, &hash).unwrap();
        assert!(matches!(
            decode_address(Network::Regtest, &addr),
            Err(AddressError::WrongHrp(_))
        ));
    }
}
