//! transaction shapes, public signals and external data
//!
//! a transaction always presents the same public layout for its shape:
//! `N` input nullifiers and two output commitments, whatever the number of
//! real notes. the shape picks N at the type level (`PublicSignals<2>` or
//! `PublicSignals<16>`), mirroring the two circuit arities.

use crate::commitment::MerkleRoot;
use crate::custody::Account;
use crate::error::{Error, Result};
use crate::note::NoteCommitment;
use crate::nullifier::Nullifier;
use crate::value::Amount;
use crate::EXT_DATA_DOMAIN;

/// outputs per transaction, for every shape
pub const OUTPUT_COUNT: usize = 2;
/// inputs of the small circuit
pub const PAIR_INPUTS: usize = 2;
/// inputs of the batch circuit
pub const BATCH_INPUTS: usize = 16;

/// circuit arity a transaction is padded to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionShape {
    /// 2 inputs / 2 outputs
    Pair,
    /// 16 inputs / 2 outputs
    Batch,
}

impl TransactionShape {
    pub const fn inputs(self) -> usize {
        match self {
            TransactionShape::Pair => PAIR_INPUTS,
            TransactionShape::Batch => BATCH_INPUTS,
        }
    }

    pub const fn outputs(self) -> usize {
        OUTPUT_COUNT
    }

    /// smallest shape that fits the given number of real notes
    pub fn for_arity(inputs: usize, outputs: usize) -> Result<Self> {
        if outputs > OUTPUT_COUNT || inputs > BATCH_INPUTS {
            return Err(Error::InvalidArity { inputs, outputs });
        }
        Ok(if inputs <= PAIR_INPUTS {
            TransactionShape::Pair
        } else {
            TransactionShape::Batch
        })
    }

    /// shape from its input count (wire decoding)
    pub fn from_inputs(inputs: usize) -> Option<Self> {
        match inputs {
            PAIR_INPUTS => Some(TransactionShape::Pair),
            BATCH_INPUTS => Some(TransactionShape::Batch),
            _ => None,
        }
    }
}

/// hash binding a proof to its external data
pub type ExtDataHash = [u8; 32];

/// public inputs of an N-input transaction proof
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicSignals<const N: usize> {
    /// tree root the input paths were built against
    pub root: MerkleRoot,
    /// ext_amount - fee; positive brings value in, negative takes it out
    pub public_amount: i128,
    pub ext_data_hash: ExtDataHash,
    pub input_nullifiers: [Nullifier; N],
    pub output_commitments: [NoteCommitment; OUTPUT_COUNT],
}

/// public signals of either shape
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signals {
    Pair(PublicSignals<PAIR_INPUTS>),
    Batch(PublicSignals<BATCH_INPUTS>),
}

macro_rules! each_shape {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Signals::Pair($s) => $body,
            Signals::Batch($s) => $body,
        }
    };
}

impl Signals {
    /// assemble signals, checking the nullifier count against the shape
    pub fn new(
        shape: TransactionShape,
        root: MerkleRoot,
        public_amount: i128,
        ext_data_hash: ExtDataHash,
        input_nullifiers: Vec<Nullifier>,
        output_commitments: [NoteCommitment; OUTPUT_COUNT],
    ) -> Result<Self> {
        let count = input_nullifiers.len();
        let arity = || Error::InvalidArity {
            inputs: count,
            outputs: OUTPUT_COUNT,
        };
        Ok(match shape {
            TransactionShape::Pair => Signals::Pair(PublicSignals {
                root,
                public_amount,
                ext_data_hash,
                input_nullifiers: input_nullifiers.try_into().map_err(|_| arity())?,
                output_commitments,
            }),
            TransactionShape::Batch => Signals::Batch(PublicSignals {
                root,
                public_amount,
                ext_data_hash,
                input_nullifiers: input_nullifiers.try_into().map_err(|_| arity())?,
                output_commitments,
            }),
        })
    }

    pub fn shape(&self) -> TransactionShape {
        match self {
            Signals::Pair(_) => TransactionShape::Pair,
            Signals::Batch(_) => TransactionShape::Batch,
        }
    }

    pub fn root(&self) -> MerkleRoot {
        each_shape!(self, s => s.root)
    }

    pub fn public_amount(&self) -> i128 {
        each_shape!(self, s => s.public_amount)
    }

    pub fn ext_data_hash(&self) -> &ExtDataHash {
        each_shape!(self, s => &s.ext_data_hash)
    }

    pub fn nullifiers(&self) -> &[Nullifier] {
        each_shape!(self, s => &s.input_nullifiers[..])
    }

    pub fn commitments(&self) -> &[NoteCommitment; OUTPUT_COUNT] {
        each_shape!(self, s => &s.output_commitments)
    }
}

/// external data: everything about the transaction that lives outside the
/// circuit but must still be bound to the proof
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtData {
    /// withdrawal destination, zero when nothing leaves the pool
    pub recipient: Account,
    /// signed value entering (+) or leaving (-) the pool
    pub ext_amount: i128,
    /// fee receiver, zero when there is no fee
    pub relayer: Account,
    pub fee: Amount,
    /// note ciphertexts, one per output commitment
    pub encrypted_outputs: [Vec<u8>; OUTPUT_COUNT],
    /// route the withdrawal through the l1 bridge
    pub is_l1_withdrawal: bool,
    /// fee for the l1 unwrapper, passed through to the bridge
    pub l1_fee: Amount,
}

impl ExtData {
    pub fn hash(&self) -> ExtDataHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(EXT_DATA_DOMAIN);
        hasher.update(&self.recipient.0);
        hasher.update(&self.ext_amount.to_le_bytes());
        hasher.update(&self.relayer.0);
        hasher.update(&self.fee.to_bytes());
        for output in &self.encrypted_outputs {
            hasher.update(&(output.len() as u64).to_le_bytes());
            hasher.update(output);
        }
        hasher.update(&[self.is_l1_withdrawal as u8]);
        hasher.update(&self.l1_fee.to_bytes());
        *hasher.finalize().as_bytes()
    }

    /// ext_amount - fee, the value the circuit balances against
    pub fn public_amount(&self) -> Option<i128> {
        i128::try_from(self.fee.0)
            .ok()
            .and_then(|fee| self.ext_amount.checked_sub(fee))
    }

    /// amount entering the pool
    pub fn deposit_amount(&self) -> Amount {
        Amount(if self.ext_amount > 0 { self.ext_amount as u128 } else { 0 })
    }

    /// amount leaving the pool to the recipient
    pub fn withdrawal_amount(&self) -> Amount {
        Amount(if self.ext_amount < 0 { self.ext_amount.unsigned_abs() } else { 0 })
    }
}

/// opaque proof bytes produced by the proof system
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Proof(pub Vec<u8>);

impl Proof {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// everything the pool needs to accept a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofBundle {
    pub signals: Signals,
    pub proof: Proof,
    pub ext_data: ExtData,
}
