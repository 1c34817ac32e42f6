use crate::amount::Amount;
use crate::covenant::Covenant;
use crate::hash::Hash;
use crate::outpoint::Outpoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: Outpoint,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub address: Vec<u8>,
    pub covenant: Covenant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.hash == Hash::ZERO
    }

    /// Non-witness serialization, hashed for the tx id.
    pub fn encode_no_witness(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.prevout.hash.as_bytes());
            out.extend_from_slice(&input.prevout.index.to_le_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.base_units().to_le_bytes());
            write_varint(&mut out, output.address.len() as u64);
            out.extend_from_slice(&output.address);
            out.extend_from_slice(&output.covenant.encode());
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Witness serialization (includes input witnesses), used for the
    /// merkle leaf per spec.md §4.B (`leaf = BLAKE2b(tx.witnessHash)`).
    pub fn encode_witness(&self) -> Vec<u8> {
        let mut out = self.encode_no_witness();
        for input in &self.inputs {
            write_varint(&mut out, input.witness.len() as u64);
            for item in &input.witness {
                write_varint(&mut out, item.len() as u64);
                out.extend_from_slice(item);
            }
        }
        out
    }

    pub fn txid(&self) -> Hash {
        Hash::digest(&self.encode_no_witness())
    }

    pub fn witness_hash(&self) -> Hash {
        Hash::digest(&self.encode_witness())
    }

    pub fn fee(&self, input_value_sum: Amount) -> Option<Amount> {
        let output_sum = self
            .outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, o| acc.checked_add(o.value).ok())?;
        input_value_sum.checked_sub(output_sum).ok()
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
    use crate::covenant::CovenantType;

    #[test]
    fn coinbase_detection() {
        let tx = Transaction {
            version: 0,
            inputs: vec![TxInput {
                prevout: Outpoint::new(Hash::ZERO, u32::MAX),
                sequence: 0,
                witness: vec![],
            }],
            outputs: vec![],
            locktime: 0,
        };
        assert!(tx.is_coinbase());
    }

    #[test]
    fn witness_hash_differs_from_txid_when_witness_present() {
        let tx = Transaction {
            version: 0,
            inputs: vec![TxInput {
                prevout: Outpoint::new(Hash::digest(b"prev"), 0),
                sequence: 0,
                witness: vec![b"sig".to_vec()],
            }],
            outputs: vec![TxOutput {
                value: Amount::from_base_units(1000).unwrap(),
                address: vec![1, 2, 3],
                covenant: Covenant::new(CovenantType::None, vec![]),
            }],
            locktime: 0,
        };
        assert_ne!(tx.txid(), tx.witness_hash());
    }
}
