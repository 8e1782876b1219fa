//! proof system capability
//!
//! the pool treats proving as an external, possibly slow capability behind
//! `ProofSystem`. the statement a proof attests to:
//! - every input with a non-zero amount is a leaf under `root`
//! - every input nullifier is derived from that leaf by its owner
//! - every output commitment opens to the claimed amount and owner
//! - sum(inputs) + public_amount == sum(outputs)
//! - input nullifiers are pairwise distinct
//!
//! `TranscriptProver` is an in-process stand-in: it checks the statement
//! directly against the private witness and then binds the public signals
//! into a merlin transcript keyed by a shared verifying key.

use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};

use crate::commitment::MerklePath;
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::note::{Blinding, NoteCommitment};
use crate::nullifier::{Nullifier, Position};
use crate::transaction::{Proof, Signals};
use crate::value::Amount;
use crate::TRANSCRIPT_DOMAIN;

/// private witness for one input note
#[derive(Clone, Debug)]
pub struct InputWitness {
    pub amount: Amount,
    pub private_key: PrivateKey,
    pub blinding: Blinding,
    pub position: Position,
    pub path: MerklePath,
}

/// private witness for one output note
#[derive(Clone, Debug)]
pub struct OutputWitness {
    pub amount: Amount,
    pub public_key: PublicKey,
    pub blinding: Blinding,
}

/// full private witness, already padded to the transaction shape
#[derive(Clone, Debug)]
pub struct Witness {
    pub inputs: Vec<InputWitness>,
    pub outputs: Vec<OutputWitness>,
}

/// prover / verifier capability
pub trait ProofSystem: Send + Sync {
    fn prove(&self, witness: &Witness, signals: &Signals) -> Result<Proof>;

    fn verify(&self, proof: &Proof, signals: &Signals) -> bool;
}

/// length of a transcript proof
pub const TRANSCRIPT_PROOF_LEN: usize = 64;

/// in-process proof system: native relation check + transcript binding
#[derive(Clone)]
pub struct TranscriptProver {
    verifying_key: [u8; 32],
}

impl TranscriptProver {
    pub fn new(verifying_key: [u8; 32]) -> Self {
        Self { verifying_key }
    }

    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self::new(key)
    }

    fn binding_tag(&self, signals: &Signals) -> [u8; TRANSCRIPT_PROOF_LEN] {
        let mut t = Transcript::new(TRANSCRIPT_DOMAIN);
        t.append_message(b"vk", &self.verifying_key);
        t.append_u64(b"inputs", signals.shape().inputs() as u64);
        t.append_message(b"root", &signals.root().0);
        t.append_message(b"public_amount", &signals.public_amount().to_le_bytes());
        t.append_message(b"ext_data_hash", signals.ext_data_hash());
        for nf in signals.nullifiers() {
            t.append_message(b"nullifier", &nf.0);
        }
        for cm in signals.commitments() {
            t.append_message(b"commitment", &cm.0);
        }
        let mut tag = [0u8; TRANSCRIPT_PROOF_LEN];
        t.challenge_bytes(b"proof", &mut tag);
        tag
    }
}

impl ProofSystem for TranscriptProver {
    fn prove(&self, witness: &Witness, signals: &Signals) -> Result<Proof> {
        check_relation(witness, signals)?;
        Ok(Proof(self.binding_tag(signals).to_vec()))
    }

    fn verify(&self, proof: &Proof, signals: &Signals) -> bool {
        proof.0.len() == TRANSCRIPT_PROOF_LEN && proof.0[..] == self.binding_tag(signals)[..]
    }
}

/// check the transaction statement against a witness
pub fn check_relation(witness: &Witness, signals: &Signals) -> Result<()> {
    let unsatisfied = |what: &str| Error::ProofGeneration(format!("unsatisfied constraint: {what}"));

    let shape = signals.shape();
    if witness.inputs.len() != shape.inputs() || witness.outputs.len() != shape.outputs() {
        return Err(Error::InvalidArity {
            inputs: witness.inputs.len(),
            outputs: witness.outputs.len(),
        });
    }

    let root = signals.root();
    for (input, expected) in witness.inputs.iter().zip(signals.nullifiers()) {
        let public_key = input.private_key.public_key();
        let commitment = NoteCommitment::compute(input.amount, &public_key.0, &input.blinding);
        let signature = input.private_key.sign(&commitment, input.position);
        if Nullifier::derive(&commitment, input.position, &signature) != *expected {
            return Err(unsatisfied("input nullifier"));
        }
        // zero-value inputs are padding and need not be in the tree
        if !input.amount.is_zero()
            && (input.path.position != input.position || !input.path.verify(&commitment, &root))
        {
            return Err(unsatisfied("input merkle path"));
        }
    }

    let nullifiers = signals.nullifiers();
    for (i, a) in nullifiers.iter().enumerate() {
        if nullifiers[i + 1..].contains(a) {
            return Err(unsatisfied("distinct nullifiers"));
        }
    }

    for (output, expected) in witness.outputs.iter().zip(signals.commitments()) {
        if NoteCommitment::compute(output.amount, &output.public_key.0, &output.blinding) != *expected {
            return Err(unsatisfied("output commitment"));
        }
    }

    let sum_in = Amount::checked_sum(witness.inputs.iter().map(|i| i.amount))
        .and_then(|a| i128::try_from(a.0).ok());
    let sum_out = Amount::checked_sum(witness.outputs.iter().map(|o| o.amount))
        .and_then(|a| i128::try_from(a.0).ok());
    let balanced = match (sum_in, sum_out) {
        (Some(i), Some(o)) => i.checked_add(signals.public_amount()) == Some(o),
        _ => false,
    };
    if !balanced {
        return Err(unsatisfied("value balance"));
    }

    Ok(())
}
