//! key management for the shielded pool
//!
//! a keypair is a random private scalar with two public derivations:
//! - public key: one-way blake3 hash, bound into note commitments
//! - encryption key: x25519 public key, used by senders to encrypt notes
//!
//! note plaintexts are encrypted with an ephemeral x25519 exchange and
//! chacha20-poly1305, so decrypting with the wrong key fails on the tag

use core::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};

use crate::error::{Error, Result};
use crate::note::NoteCommitment;
use crate::nullifier::Position;

const PUBLIC_KEY_DOMAIN: &[u8] = b"shielded-pool.public-key.v1";
const ENCRYPTION_KEY_DOMAIN: &[u8] = b"shielded-pool.encryption-key.v1";
const SIGNATURE_DOMAIN: &[u8] = b"shielded-pool.signature.v1";
const PAYLOAD_KEY_DOMAIN: &[u8] = b"shielded-pool.payload-key.v1";

/// private spending scalar
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// derive the note-owning public key
    pub fn public_key(&self) -> PublicKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(PUBLIC_KEY_DOMAIN);
        hasher.update(&self.0);
        PublicKey(*hasher.finalize().as_bytes())
    }

    fn encryption_secret(&self) -> StaticSecret {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ENCRYPTION_KEY_DOMAIN);
        hasher.update(&self.0);
        StaticSecret::from(*hasher.finalize().as_bytes())
    }

    /// sign a (commitment, position) pair for nullifier derivation
    pub fn sign(&self, commitment: &NoteCommitment, position: Position) -> Signature {
        let mut hasher = blake3::Hasher::new();
        hasher.update(SIGNATURE_DOMAIN);
        hasher.update(&self.0);
        hasher.update(commitment.as_ref());
        hasher.update(&position.to_bytes());
        Signature(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// public key bound into note commitments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// x25519 public key that note plaintexts are encrypted to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptionKey(pub [u8; 32]);

impl EncryptionKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// shareable shielded address: who owns a note and how to reach them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShieldedAddress {
    pub public_key: PublicKey,
    pub encryption_key: EncryptionKey,
}

impl ShieldedAddress {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.public_key.0);
        bytes[32..].copy_from_slice(&self.encryption_key.0);
        bytes
    }

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        let mut pk = [0u8; 32];
        let mut ek = [0u8; 32];
        pk.copy_from_slice(&bytes[..32]);
        ek.copy_from_slice(&bytes[32..]);
        Self {
            public_key: PublicKey(pk),
            encryption_key: EncryptionKey(ek),
        }
    }

    /// parse the hex form produced by `Display`
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::InvalidAddress(e.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }
}

impl fmt::Display for ShieldedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

/// deterministic signature over a note position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; 32]);

impl Signature {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// spending keypair
#[derive(Clone, Debug)]
pub struct Keypair {
    private_key: PrivateKey,
    public_key: PublicKey,
    encryption_key: EncryptionKey,
}

impl Keypair {
    /// sample a fresh private scalar from a cryptographic rng
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::from_private_key(PrivateKey(seed))
    }

    /// fresh keypair from the os rng
    pub fn random() -> Self {
        Self::generate(&mut rand::rngs::OsRng)
    }

    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        let encryption_key =
            EncryptionKey(X25519Public::from(&private_key.encryption_secret()).to_bytes());
        Self {
            private_key,
            public_key,
            encryption_key,
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn encryption_key(&self) -> EncryptionKey {
        self.encryption_key
    }

    pub fn address(&self) -> ShieldedAddress {
        ShieldedAddress {
            public_key: self.public_key,
            encryption_key: self.encryption_key,
        }
    }

    pub fn sign(&self, commitment: &NoteCommitment, position: Position) -> Signature {
        self.private_key.sign(commitment, position)
    }

    /// decrypt a payload addressed to this keypair
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        let secret = self.private_key.encryption_secret();
        let shared = secret.diffie_hellman(&X25519Public::from(payload.ephemeral_key));
        let key = derive_payload_key(shared.as_bytes(), &payload.ephemeral_key);

        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| Error::DecryptionError)?;
        cipher
            .decrypt(Nonce::from_slice(&payload.nonce), payload.ciphertext.as_slice())
            .map_err(|_| Error::DecryptionError)
    }
}

/// ephemeral-key ciphertext published alongside a note commitment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// x25519 ephemeral public key
    pub ephemeral_key: [u8; 32],
    pub nonce: [u8; 12],
    /// chacha20-poly1305 ciphertext (plaintext + 16 byte tag)
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    const HEADER_LEN: usize = 32 + 12;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.ephemeral_key);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // anything shorter than header + tag cannot be a valid payload
        if bytes.len() < Self::HEADER_LEN + 16 {
            return Err(Error::DecryptionError);
        }
        let mut ephemeral_key = [0u8; 32];
        let mut nonce = [0u8; 12];
        ephemeral_key.copy_from_slice(&bytes[..32]);
        nonce.copy_from_slice(&bytes[32..44]);
        Ok(Self {
            ephemeral_key,
            nonce,
            ciphertext: bytes[Self::HEADER_LEN..].to_vec(),
        })
    }
}

/// encrypt a plaintext to a recipient's encryption key
pub fn encrypt<R: RngCore + CryptoRng>(
    recipient: &EncryptionKey,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<EncryptedPayload> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(&mut *rng);
    let ephemeral_key = X25519Public::from(&ephemeral_secret).to_bytes();

    let shared = ephemeral_secret.diffie_hellman(&X25519Public::from(recipient.0));
    if !shared.was_contributory() {
        return Err(Error::EncryptionError);
    }
    let key = derive_payload_key(shared.as_bytes(), &ephemeral_key);

    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| Error::EncryptionError)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::EncryptionError)?;

    Ok(EncryptedPayload {
        ephemeral_key,
        nonce,
        ciphertext,
    })
}

fn derive_payload_key(shared_secret: &[u8], ephemeral_key: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(PAYLOAD_KEY_DOMAIN);
    hasher.update(shared_secret);
    hasher.update(ephemeral_key);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_key_derivation() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let kp = Keypair::generate(&mut rng);

        // deterministic from the private key
        let again = Keypair::from_private_key(kp.private_key().clone());
        assert_eq!(kp.address(), again.address());

        let other = Keypair::generate(&mut rng);
        assert_ne!(kp.public_key(), other.public_key());
        assert_ne!(kp.encryption_key(), other.encryption_key());
    }

    #[test]
    fn test_random_keypairs_are_usable() {
        let a = Keypair::random();
        let b = Keypair::random();
        assert_ne!(a.address(), b.address());

        let payload = encrypt(&a.encryption_key(), b"note", &mut rand::rngs::OsRng).unwrap();
        assert_eq!(a.decrypt(&payload).unwrap(), b"note");
        assert!(b.decrypt(&payload).is_err());
    }

    #[test]
    fn test_sign_binds_position() {
        let kp = Keypair::generate(&mut ChaCha20Rng::seed_from_u64(2));
        let c = NoteCommitment::from_bytes([9u8; 32]);

        assert_eq!(kp.sign(&c, Position(3)), kp.sign(&c, Position(3)));
        assert_ne!(kp.sign(&c, Position(3)), kp.sign(&c, Position(4)));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let kp = Keypair::generate(&mut rng);
        let plaintext = b"amount and blinding";

        let payload = encrypt(&kp.encryption_key(), plaintext, &mut rng).unwrap();
        let decoded = EncryptedPayload::from_bytes(&payload.to_bytes()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(kp.decrypt(&decoded).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let alice = Keypair::generate(&mut rng);
        let bob = Keypair::generate(&mut rng);

        let payload = encrypt(&alice.encryption_key(), b"secret", &mut rng).unwrap();
        assert_eq!(bob.decrypt(&payload), Err(Error::DecryptionError));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        assert_eq!(
            EncryptedPayload::from_bytes(&[0u8; 40]),
            Err(Error::DecryptionError)
        );
    }

    #[test]
    fn test_address_hex() {
        let kp = Keypair::generate(&mut ChaCha20Rng::seed_from_u64(5));
        let addr = kp.address();
        assert_eq!(ShieldedAddress::from_hex(&addr.to_string()).unwrap(), addr);
    }
}
