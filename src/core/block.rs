//! Block implementation for the chain
//!
//! A block is a header plus a body of inputs, outputs and kernels. Only the
//! header takes part in chain acceptance; the body is carried opaquely and
//! handed to the external body validator.

use crate::core::difficulty::Difficulty;
use crate::core::proof::{Proof, MAX_PROOF_NONCES};
use crate::crypto::{double_sha256, BlockHash, Hash};
use crate::ser::{
    read_array, read_i64, read_u32, read_u64, read_u8, read_var_bytes, read_vec, write_var_bytes,
    write_vec, Readable, WireError, Writeable,
};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Body Constants (sizes fixed by the commitment library)
// =============================================================================

/// Size of a Pedersen commitment
pub const PEDERSEN_COMMITMENT_SIZE: usize = 33;

/// Maximum size of a range proof
pub const MAX_RANGE_PROOF_SIZE: usize = 5134;

/// Maximum size of a kernel signature
pub const MAX_SIGNATURE_SIZE: usize = 72;

/// Maximum number of inputs, outputs or kernels accepted in one block body
pub const MAX_BODY_ITEMS: usize = 50_000;

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Header version
    pub version: u32,
    /// Height of this block since genesis (0)
    pub height: u64,
    /// Hash of the previous block header
    pub previous: BlockHash,
    /// Block creation timestamp (second precision)
    pub timestamp: DateTime<Utc>,
    /// Target difficulty of this block
    pub difficulty: Difficulty,
    /// Cumulative difficulty of the chain ending at this header
    pub total_difficulty: Difficulty,
    /// Merkle root of the UTXO set
    pub utxo_root: Hash,
    /// Merkle root of the range proofs
    pub range_proof_root: Hash,
    /// Merkle root of the kernels
    pub kernel_root: Hash,
    /// Mining nonce
    pub nonce: u64,
    /// Proof-of-work witness
    pub pow: Proof,
}

impl BlockHeader {
    /// Deterministic identity of the header
    pub fn hash(&self) -> BlockHash {
        double_sha256(&self.to_bytes())
    }

    /// Template for a header extending this one, with the total difficulty
    /// already accumulated
    pub fn child(&self, difficulty: Difficulty, nonce: u64, pow: Proof) -> BlockHeader {
        BlockHeader {
            version: self.version,
            height: self.height + 1,
            previous: self.hash(),
            timestamp: self.timestamp + Duration::seconds(60),
            difficulty,
            total_difficulty: self.total_difficulty + difficulty,
            utxo_root: Hash::default(),
            range_proof_root: Hash::default(),
            kernel_root: Hash::default(),
            nonce,
            pow,
        }
    }
}

impl Writeable for BlockHeader {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
        buf.put_u64(self.height);
        self.previous.write(buf);
        buf.put_i64(self.timestamp.timestamp());
        buf.put_u64(self.difficulty.to_num());
        buf.put_u64(self.total_difficulty.to_num());
        self.utxo_root.write(buf);
        self.range_proof_root.write(buf);
        self.kernel_root.write(buf);
        buf.put_u64(self.nonce);
        self.pow.write(buf);
    }
}

impl Readable for BlockHeader {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        let version = read_u32(buf)?;
        let height = read_u64(buf)?;
        let previous = Hash::read(buf)?;
        let secs = read_i64(buf)?;
        let timestamp =
            DateTime::<Utc>::from_timestamp(secs, 0).ok_or(WireError::InvalidTimestamp(secs))?;
        let difficulty = Difficulty::from_num(read_u64(buf)?);
        let total_difficulty = Difficulty::from_num(read_u64(buf)?);
        let utxo_root = Hash::read(buf)?;
        let range_proof_root = Hash::read(buf)?;
        let kernel_root = Hash::read(buf)?;
        let nonce = read_u64(buf)?;
        let pow = Proof::read(buf)?;

        Ok(BlockHeader {
            version,
            height,
            previous,
            timestamp,
            difficulty,
            total_difficulty,
            utxo_root,
            range_proof_root,
            kernel_root,
            nonce,
            pow,
        })
    }
}

impl Writeable for Hash {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(self.as_bytes());
    }
}

impl Readable for Hash {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Hash::from_bytes(read_array(buf)?))
    }
}

// A proof is `u8 count | count x u32`; the count is checked against
// PROOF_SIZE by the chain, not by the parser. `Proof::new` keeps the count
// within a byte, so nothing is ever cut off here.
impl Writeable for Proof {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.len() as u8);
        for nonce in self.nonces() {
            buf.put_u32(*nonce);
        }
    }
}

impl Readable for Proof {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        let count = read_u8(buf)? as usize;
        let mut nonces = Vec::with_capacity(count);
        for _ in 0..count {
            nonces.push(read_u32(buf)?);
        }
        Proof::new(nonces).map_err(|_| WireError::TooManyItems {
            what: "proof nonces",
            count: count as u64,
            max: MAX_PROOF_NONCES,
        })
    }
}

// =============================================================================
// Block Body
// =============================================================================

/// Pedersen commitment, opaque to this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment(pub [u8; PEDERSEN_COMMITMENT_SIZE]);

impl Writeable for Commitment {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl Readable for Commitment {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Commitment(read_array(buf)?))
    }
}

/// Spends a previous output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub commitment: Commitment,
}

/// Creates a new output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub features: u8,
    pub commitment: Commitment,
    pub range_proof: Vec<u8>,
}

/// Transaction kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxKernel {
    pub features: u8,
    pub fee: u64,
    pub lock_height: u64,
    pub excess: Commitment,
    pub excess_sig: Vec<u8>,
}

impl Writeable for Input {
    fn write(&self, buf: &mut BytesMut) {
        self.commitment.write(buf);
    }
}

impl Readable for Input {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Input {
            commitment: Commitment::read(buf)?,
        })
    }
}

impl Writeable for Output {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.features);
        self.commitment.write(buf);
        write_var_bytes(buf, &self.range_proof);
    }
}

impl Readable for Output {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Output {
            features: read_u8(buf)?,
            commitment: Commitment::read(buf)?,
            range_proof: read_var_bytes(buf, "range proof bytes", MAX_RANGE_PROOF_SIZE)?,
        })
    }
}

impl Writeable for TxKernel {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.features);
        buf.put_u64(self.fee);
        buf.put_u64(self.lock_height);
        self.excess.write(buf);
        write_var_bytes(buf, &self.excess_sig);
    }
}

impl Readable for TxKernel {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(TxKernel {
            features: read_u8(buf)?,
            fee: read_u64(buf)?,
            lock_height: read_u64(buf)?,
            excess: Commitment::read(buf)?,
            excess_sig: read_var_bytes(buf, "signature bytes", MAX_SIGNATURE_SIZE)?,
        })
    }
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub kernels: Vec<TxKernel>,
}

impl Block {
    /// A block with an empty body
    pub fn with_header(header: BlockHeader) -> Self {
        Self {
            header,
            inputs: Vec::new(),
            outputs: Vec::new(),
            kernels: Vec::new(),
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

impl Writeable for Block {
    fn write(&self, buf: &mut BytesMut) {
        self.header.write(buf);
        write_vec(buf, &self.inputs);
        write_vec(buf, &self.outputs);
        write_vec(buf, &self.kernels);
    }
}

impl Readable for Block {
    fn read(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Block {
            header: BlockHeader::read(buf)?,
            inputs: read_vec(buf, "inputs", MAX_BODY_ITEMS)?,
            outputs: read_vec(buf, "outputs", MAX_BODY_ITEMS)?,
            kernels: read_vec(buf, "kernels", MAX_BODY_ITEMS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proof::PROOF_SIZE;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            height: 7,
            previous: Hash::repeat(0x11),
            timestamp: DateTime::<Utc>::from_timestamp(1_534_204_800, 0).unwrap(),
            difficulty: Difficulty::from_num(20),
            total_difficulty: Difficulty::from_num(1_140),
            utxo_root: Hash::repeat(0x22),
            range_proof_root: Hash::repeat(0x33),
            kernel_root: Hash::repeat(0x44),
            nonce: 99,
            pow: Proof::new((0..PROOF_SIZE as u32).collect()).unwrap(),
        }
    }

    #[test]
    fn test_header_hash_is_deterministic() {
        let header = sample_header();
        assert_eq!(header.hash(), header.clone().hash());

        let mut other = header.clone();
        other.nonce += 1;
        assert_ne!(header.hash(), other.hash());
    }

    #[test]
    fn test_header_wire_roundtrip() {
        let header = sample_header();
        let mut bytes = header.to_bytes();
        let decoded = BlockHeader::read(&mut bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_widest_proof_keeps_every_nonce() {
        // Two proofs that differ only in their last nonce must hash apart
        let mut a = sample_header();
        a.pow = Proof::new(vec![5; MAX_PROOF_NONCES]).unwrap();
        let mut b = a.clone();
        let mut nonces = b.pow.nonces().to_vec();
        nonces[MAX_PROOF_NONCES - 1] = 6;
        b.pow = Proof::new(nonces).unwrap();
        assert_ne!(a.hash(), b.hash());

        let decoded = BlockHeader::read(&mut a.to_bytes()).unwrap();
        assert_eq!(decoded.pow.len(), MAX_PROOF_NONCES);
        assert_eq!(decoded, a);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = sample_header().to_bytes();
        let mut short = bytes.slice(..bytes.len() - 3);
        assert!(matches!(
            BlockHeader::read(&mut short),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_child_accumulates_difficulty() {
        let parent = sample_header();
        let child = parent.child(Difficulty::from_num(5), 1, Proof::default());
        assert_eq!(child.height, parent.height + 1);
        assert_eq!(child.previous, parent.hash());
        assert_eq!(child.total_difficulty.to_num(), 1_145);
    }

    #[test]
    fn test_block_with_body_roundtrip() {
        let mut block = Block::with_header(sample_header());
        block.inputs.push(Input {
            commitment: Commitment([9; PEDERSEN_COMMITMENT_SIZE]),
        });
        block.outputs.push(Output {
            features: 1,
            commitment: Commitment([8; PEDERSEN_COMMITMENT_SIZE]),
            range_proof: vec![0xaa; 675],
        });
        block.kernels.push(TxKernel {
            features: 0,
            fee: 8_000_000,
            lock_height: 0,
            excess: Commitment([7; PEDERSEN_COMMITMENT_SIZE]),
            excess_sig: vec![0xbb; 64],
        });

        let mut bytes = block.to_bytes();
        assert_eq!(Block::read(&mut bytes).unwrap(), block);
        assert_eq!(block.hash(), block.header.hash());
    }

    #[test]
    fn test_oversized_range_proof_rejected() {
        let mut block = Block::with_header(sample_header());
        block.outputs.push(Output {
            features: 0,
            commitment: Commitment([1; PEDERSEN_COMMITMENT_SIZE]),
            range_proof: vec![0; MAX_RANGE_PROOF_SIZE + 1],
        });
        let mut bytes = block.to_bytes();
        assert!(matches!(
            Block::read(&mut bytes),
            Err(WireError::TooManyItems { .. })
        ));
    }
}
