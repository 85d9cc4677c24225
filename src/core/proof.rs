//! Proof-of-work witness
//!
//! A proof is the list of cycle nonces found by the miner. Checking that the
//! nonces really form a cycle belongs to the external verifier; this module
//! only knows how many of them a well-formed proof carries.
//!
//! The wire format counts nonces with a single byte, so a proof can never
//! hold more than [`MAX_PROOF_NONCES`]. Every serialized proof therefore
//! carries all of its nonces and two different proofs never hash alike.

use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Number of nonces in a well-formed proof
pub const PROOF_SIZE: usize = 42;

/// Most nonces the one-byte wire count can describe
pub const MAX_PROOF_NONCES: usize = u8::MAX as usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Malformed proof: {len} nonces (expected {expected})")]
    MalformedProof { len: usize, expected: usize },
    #[error("Proof has {len} nonces, at most {max} fit on the wire")]
    TooManyNonces { len: usize, max: usize },
}

/// Proof-of-work witness, compared by exact nonce sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Proof {
    nonces: Vec<u32>,
}

impl Proof {
    /// Wrap a nonce list, refusing lists the wire format cannot carry
    pub fn new(nonces: Vec<u32>) -> Result<Self, ProofError> {
        if nonces.len() > MAX_PROOF_NONCES {
            return Err(ProofError::TooManyNonces {
                len: nonces.len(),
                max: MAX_PROOF_NONCES,
            });
        }
        Ok(Self { nonces })
    }

    /// A full-size proof, always representable
    pub fn from_array(nonces: [u32; PROOF_SIZE]) -> Self {
        Self {
            nonces: nonces.to_vec(),
        }
    }

    pub fn nonces(&self) -> &[u32] {
        &self.nonces
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    /// Reject proofs that do not carry exactly `PROOF_SIZE` nonces
    pub fn validate_size(&self) -> Result<(), ProofError> {
        if self.nonces.len() != PROOF_SIZE {
            return Err(ProofError::MalformedProof {
                len: self.nonces.len(),
                expected: PROOF_SIZE,
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ProofFields {
    nonces: Vec<u32>,
}

impl<'de> Deserialize<'de> for Proof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = ProofFields::deserialize(deserializer)?;
        Proof::new(fields.nonces).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_size() {
        let proof = Proof::new((0..PROOF_SIZE as u32).collect()).unwrap();
        assert!(proof.validate_size().is_ok());

        let short = Proof::new(vec![1, 2, 3]).unwrap();
        assert_eq!(
            short.validate_size(),
            Err(ProofError::MalformedProof {
                len: 3,
                expected: PROOF_SIZE
            })
        );

        let long = Proof::new(vec![7; PROOF_SIZE + 1]).unwrap();
        assert!(long.validate_size().is_err());
        assert!(Proof::default().validate_size().is_err());
    }

    #[test]
    fn test_equality_is_sequence_equality() {
        let a = Proof::new(vec![1, 2, 3]).unwrap();
        let b = Proof::new(vec![1, 2, 3]).unwrap();
        let c = Proof::new(vec![3, 2, 1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nonce_count_bounded_by_wire_count() {
        assert_eq!(Proof::new(vec![0; MAX_PROOF_NONCES]).unwrap().len(), 255);
        assert_eq!(
            Proof::new(vec![0; MAX_PROOF_NONCES + 1]),
            Err(ProofError::TooManyNonces {
                len: 256,
                max: MAX_PROOF_NONCES
            })
        );
    }

    #[test]
    fn test_from_array_is_well_formed() {
        let proof = Proof::from_array([9; PROOF_SIZE]);
        assert!(proof.validate_size().is_ok());
        assert_eq!(proof.nonces(), &[9; PROOF_SIZE][..]);
    }

    #[test]
    fn test_deserialize_enforces_bound() {
        let ok: Proof = serde_json::from_str(r#"{"nonces":[1,2,3]}"#).unwrap();
        assert_eq!(ok.nonces(), &[1, 2, 3]);

        let json = format!(r#"{{"nonces":{:?}}}"#, vec![0u32; MAX_PROOF_NONCES + 1]);
        assert!(serde_json::from_str::<Proof>(&json).is_err());
    }
}
