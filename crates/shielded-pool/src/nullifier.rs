//! nullifiers for preventing double-spends
//!
//! when a note is spent, its nullifier is published
//! if nullifier already exists in the set, the spend is rejected

use core::fmt;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::Signature;
use crate::note::NoteCommitment;
use crate::NULLIFIER_DOMAIN;

/// position in the commitment tree
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Position(pub u64);

impl Position {
    pub fn new(pos: u64) -> Self {
        Self(pos)
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// nullifier - unique identifier for a spent note
///
/// derived from:
/// - note commitment
/// - position in tree
/// - owner signature over both
///
/// only the owner can produce the signature, and each inserted note has
/// exactly one position, so each note has exactly one nullifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn derive(commitment: &NoteCommitment, position: Position, signature: &Signature) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NULLIFIER_DOMAIN);
        hasher.update(commitment.as_ref());
        hasher.update(&position.to_bytes());
        hasher.update(&signature.0);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// append-only set of spent nullifiers
#[derive(Clone, Debug, Default)]
pub struct NullifierSet {
    nullifiers: HashSet<Nullifier>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// check if nullifier exists (note already spent)
    pub fn contains(&self, nullifier: &Nullifier) -> bool {
        self.nullifiers.contains(nullifier)
    }

    /// insert nullifier (mark note as spent)
    pub fn insert(&mut self, nullifier: Nullifier) -> Result<()> {
        if !self.nullifiers.insert(nullifier) {
            return Err(Error::DoubleSpend(nullifier));
        }
        Ok(())
    }

    /// number of spent notes
    pub fn len(&self) -> usize {
        self.nullifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nullifiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keypair;
    use crate::note::{Blinding, Note};
    use crate::value::Amount;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_nullifier_derivation() {
        let kp = Keypair::generate(&mut ChaCha20Rng::seed_from_u64(7));
        let note = Note::with_blinding(Amount(1000), kp.address(), Blinding([1u8; 32]));
        let commitment = note.commitment();
        let pos = Position::new(42);

        let nf = Nullifier::derive(&commitment, pos, &kp.sign(&commitment, pos));

        // same inputs = same nullifier
        let nf2 = Nullifier::derive(&commitment, pos, &kp.sign(&commitment, pos));
        assert_eq!(nf, nf2);

        // different position = different nullifier
        let pos3 = Position::new(43);
        let nf3 = Nullifier::derive(&commitment, pos3, &kp.sign(&commitment, pos3));
        assert_ne!(nf, nf3);

        // different note = different nullifier
        let note2 = Note::with_blinding(Amount(1000), kp.address(), Blinding([2u8; 32]));
        let c2 = note2.commitment();
        let nf4 = Nullifier::derive(&c2, pos, &kp.sign(&c2, pos));
        assert_ne!(nf, nf4);
    }

    #[test]
    fn test_nullifier_set() {
        let mut set = NullifierSet::new();
        let nf = Nullifier([1u8; 32]);

        assert!(!set.contains(&nf));
        assert!(set.insert(nf).is_ok());
        assert!(set.contains(&nf));
        // double-spend rejected, set unchanged
        assert_eq!(set.insert(nf), Err(Error::DoubleSpend(nf)));
        assert_eq!(set.len(), 1);
    }
}
