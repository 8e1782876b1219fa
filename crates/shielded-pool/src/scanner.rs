//! wallet-side note discovery
//!
//! trial-decrypts every published output with a keypair. an output counts
//! as ours only if it decrypts and the recovered plaintext reopens the
//! published commitment.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::trace;

use crate::builder::SpendableNote;
use crate::custody::Custody;
use crate::error::Result;
use crate::keys::{EncryptedPayload, Keypair};
use crate::note::{Note, NoteCommitment};
use crate::nullifier::{Nullifier, Position};
use crate::pool::{PoolEvent, PoolStateMachine};
use crate::proof::ProofSystem;
use crate::value::Amount;

/// notes found for one keypair
#[derive(Clone, Debug, Default)]
pub struct ScanResult {
    pub unspent: Vec<SpendableNote>,
    pub spent: Vec<Note>,
}

impl ScanResult {
    pub fn balance(&self) -> Amount {
        self.unspent
            .iter()
            .fold(Amount::ZERO, |acc, n| acc.saturating_add(n.note.amount()))
    }
}

pub struct NoteScanner {
    keypair: Keypair,
}

impl NoteScanner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// try one published output
    pub fn try_decrypt(
        &self,
        commitment: &NoteCommitment,
        index: Position,
        encrypted_output: &[u8],
    ) -> Option<Note> {
        let note = EncryptedPayload::from_bytes(encrypted_output)
            .and_then(|payload| Note::decrypt(&self.keypair, &payload, index));
        match note {
            Ok(note) if note.commitment() == *commitment => Some(note),
            Ok(_) => {
                trace!(%index, "plaintext does not open the commitment");
                None
            }
            Err(e) => {
                trace!(%index, error = %e, "not ours");
                None
            }
        }
    }

    /// every note in `events` owned by this keypair, in tree order
    pub fn scan(&self, events: &[PoolEvent]) -> Vec<Note> {
        let outputs: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                PoolEvent::NewCommitment {
                    commitment,
                    index,
                    encrypted_output,
                } => Some((commitment, *index, encrypted_output.as_slice())),
                _ => None,
            })
            .collect();

        #[cfg(feature = "parallel")]
        let iter = outputs.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = outputs.iter();

        iter.filter_map(|(commitment, index, data)| self.try_decrypt(commitment, *index, data))
            .collect()
    }

    /// split our notes into unspent and spent; zero-value notes are dropped
    pub fn classify(
        &self,
        events: &[PoolEvent],
        is_spent: impl Fn(&Nullifier) -> bool,
    ) -> Result<ScanResult> {
        let mut result = ScanResult::default();
        for note in self.scan(events) {
            if note.amount().is_zero() {
                continue;
            }
            if is_spent(&note.nullifier(&self.keypair)?) {
                result.spent.push(note);
            } else {
                result
                    .unspent
                    .push(SpendableNote::new(note, self.keypair.clone()));
            }
        }
        Ok(result)
    }

    /// scan a pool's full event log
    pub fn scan_pool<C: Custody, P: ProofSystem>(
        &self,
        pool: &PoolStateMachine<C, P>,
    ) -> Result<ScanResult> {
        self.classify(&pool.events(), |nf| pool.is_spent(nf))
    }
}
