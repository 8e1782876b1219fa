//! shielded notes (utxos)
//!
//! a note represents a shielded balance owned by a public key. its commitment
//! is what enters the tree; the plaintext travels encrypted to the owner

use core::fmt;

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::{self, EncryptedPayload, Keypair, ShieldedAddress};
use crate::nullifier::{Nullifier, Position};
use crate::value::Amount;
use crate::NOTE_DOMAIN;

/// plaintext layout: amount (16 bytes le) || blinding (32 bytes)
const PLAINTEXT_LEN: usize = 16 + 32;

/// random blinding factor hiding the note contents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Blinding(pub [u8; 32]);

impl Blinding {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// a shielded note (the "utxo")
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    amount: Amount,
    owner: ShieldedAddress,
    blinding: Blinding,
    /// set once the commitment has been appended to the tree
    index: Option<Position>,
}

impl Note {
    /// new note with a freshly sampled blinding
    pub fn new<R: RngCore + CryptoRng>(amount: Amount, owner: ShieldedAddress, rng: &mut R) -> Self {
        Self::with_blinding(amount, owner, Blinding::random(rng))
    }

    pub fn with_blinding(amount: Amount, owner: ShieldedAddress, blinding: Blinding) -> Self {
        Self {
            amount,
            owner,
            blinding,
            index: None,
        }
    }

    /// zero-value note, used for padding and for emptying change
    pub fn zero<R: RngCore + CryptoRng>(owner: ShieldedAddress, rng: &mut R) -> Self {
        Self::new(Amount::ZERO, owner, rng)
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn owner(&self) -> &ShieldedAddress {
        &self.owner
    }

    pub fn blinding(&self) -> &Blinding {
        &self.blinding
    }

    pub fn index(&self) -> Option<Position> {
        self.index
    }

    /// commitment = H(amount, owner public key, blinding)
    pub fn commitment(&self) -> NoteCommitment {
        NoteCommitment::compute(self.amount, &self.owner.public_key.0, &self.blinding)
    }

    /// record the tree position; a position is assigned exactly once
    pub fn set_index(&mut self, position: Position) -> Result<()> {
        match self.index {
            Some(existing) => Err(Error::IndexAlreadyAssigned(existing.0)),
            None => {
                self.index = Some(position);
                Ok(())
            }
        }
    }

    /// nullifier = H(commitment, index, sign(private key, commitment, index))
    pub fn nullifier(&self, keypair: &Keypair) -> Result<Nullifier> {
        let position = self.index.ok_or(Error::NotInserted)?;
        if keypair.public_key() != self.owner.public_key {
            return Err(Error::Unauthorized);
        }
        let commitment = self.commitment();
        Ok(Nullifier::derive(
            &commitment,
            position,
            &keypair.sign(&commitment, position),
        ))
    }

    /// encrypt amount and blinding to the owner
    pub fn encrypt<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<EncryptedPayload> {
        let mut plaintext = [0u8; PLAINTEXT_LEN];
        plaintext[..16].copy_from_slice(&self.amount.to_bytes());
        plaintext[16..].copy_from_slice(&self.blinding.0);
        keys::encrypt(&self.owner.encryption_key, &plaintext, rng)
    }

    /// recover a note published at `position` from its ciphertext
    pub fn decrypt(keypair: &Keypair, payload: &EncryptedPayload, position: Position) -> Result<Self> {
        let plaintext = keypair.decrypt(payload)?;
        if plaintext.len() != PLAINTEXT_LEN {
            return Err(Error::DecryptionError);
        }
        let mut amount = [0u8; 16];
        let mut blinding = [0u8; 32];
        amount.copy_from_slice(&plaintext[..16]);
        blinding.copy_from_slice(&plaintext[16..]);

        let mut note = Self::with_blinding(
            Amount::from_bytes(amount),
            keypair.address(),
            Blinding(blinding),
        );
        note.index = Some(position);
        Ok(note)
    }
}

/// commitment to a note (what goes in the commitment tree)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteCommitment(pub [u8; 32]);

impl NoteCommitment {
    pub(crate) fn compute(amount: Amount, public_key: &[u8; 32], blinding: &Blinding) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NOTE_DOMAIN);
        hasher.update(&amount.to_bytes());
        hasher.update(public_key);
        hasher.update(&blinding.0);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for NoteCommitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NoteCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_note_commitment() {
        let kp = Keypair::generate(&mut ChaCha20Rng::seed_from_u64(1));
        let addr = kp.address();

        let note = Note::with_blinding(Amount(1000), addr, Blinding([1u8; 32]));

        // same note = same commitment
        let note2 = Note::with_blinding(Amount(1000), addr, Blinding([1u8; 32]));
        assert_eq!(note.commitment(), note2.commitment());

        // different blinding = different commitment
        let note3 = Note::with_blinding(Amount(1000), addr, Blinding([2u8; 32]));
        assert_ne!(note.commitment(), note3.commitment());

        // different amount = different commitment
        let note4 = Note::with_blinding(Amount(1001), addr, Blinding([1u8; 32]));
        assert_ne!(note.commitment(), note4.commitment());
    }

    #[test]
    fn test_index_assigned_once() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let kp = Keypair::generate(&mut rng);
        let mut note = Note::new(Amount(5), kp.address(), &mut rng);
        let before = note.commitment();

        assert_eq!(note.nullifier(&kp), Err(Error::NotInserted));
        note.set_index(Position(3)).unwrap();
        assert_eq!(note.set_index(Position(4)), Err(Error::IndexAlreadyAssigned(3)));
        assert_eq!(note.index(), Some(Position(3)));

        // position does not feed the commitment
        assert_eq!(note.commitment(), before);
    }

    #[test]
    fn test_nullifier_requires_owner() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let alice = Keypair::generate(&mut rng);
        let bob = Keypair::generate(&mut rng);
        let mut note = Note::new(Amount(5), alice.address(), &mut rng);
        note.set_index(Position(0)).unwrap();

        assert!(note.nullifier(&alice).is_ok());
        assert_eq!(note.nullifier(&bob), Err(Error::Unauthorized));
    }

    #[test]
    fn test_note_encrypt_decrypt() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let kp = Keypair::generate(&mut rng);
        let note = Note::new(Amount(1000), kp.address(), &mut rng);

        let payload = note.encrypt(&mut rng).unwrap();
        let recovered = Note::decrypt(&kp, &payload, Position(9)).unwrap();

        assert_eq!(recovered.amount(), note.amount());
        assert_eq!(recovered.commitment(), note.commitment());
        assert_eq!(recovered.index(), Some(Position(9)));

        let stranger = Keypair::generate(&mut rng);
        assert_eq!(
            Note::decrypt(&stranger, &payload, Position(9)),
            Err(Error::DecryptionError)
        );
    }
}
