//! transaction builder
//!
//! turns "spend these notes, create those notes" into a proof bundle:
//!
//! ```text
//! request ──► shape + ext amount ──► witness read (tree, read lock)
//!                                          │
//!    bundle ◄── root recheck ◄── prove ◄───┘  (no lock held)
//! ```
//!
//! the builder never mutates shared state, so any number of builders can run
//! in parallel against one pool.

use rand_core::{CryptoRng, RngCore};
use tracing::debug;

use crate::commitment::{CommitmentTree, MerklePath, MerkleRoot};
use crate::custody::Account;
use crate::error::{Error, Result};
use crate::keys::Keypair;
use crate::note::Note;
use crate::nullifier::{Nullifier, Position};
use crate::proof::{InputWitness, OutputWitness, ProofSystem, Witness};
use crate::transaction::{ExtData, ProofBundle, Signals, TransactionShape, OUTPUT_COUNT};
use crate::value::Amount;

/// read access to the commitment tree needed to build a witness
pub trait TreeReader {
    /// current root and paths for `positions`, taken from one tree snapshot
    fn witness(&self, positions: &[Position]) -> Result<(MerkleRoot, Vec<MerklePath>)>;

    fn is_known_root(&self, root: &MerkleRoot) -> bool;
}

impl TreeReader for CommitmentTree {
    fn witness(&self, positions: &[Position]) -> Result<(MerkleRoot, Vec<MerklePath>)> {
        let paths = positions
            .iter()
            .map(|p| self.path_to(*p))
            .collect::<Result<Vec<_>>>()?;
        Ok((self.root(), paths))
    }

    fn is_known_root(&self, root: &MerkleRoot) -> bool {
        CommitmentTree::is_known_root(self, root)
    }
}

/// an inserted note together with the key that can spend it
#[derive(Clone, Debug)]
pub struct SpendableNote {
    pub note: Note,
    pub keypair: Keypair,
}

impl SpendableNote {
    pub fn new(note: Note, keypair: Keypair) -> Self {
        Self { note, keypair }
    }
}

/// where the external value goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    /// value enters the pool (ext amount > 0 allowed)
    Deposit,
    /// purely shielded, ext amount must be 0
    Transfer,
    /// value leaves the pool to `recipient`
    Withdrawal {
        recipient: Account,
        /// route through the l1 bridge
        to_l1: bool,
        l1_fee: Amount,
    },
}

/// what the caller wants the transaction to do
#[derive(Clone, Debug)]
pub struct TransactionRequest {
    pub inputs: Vec<SpendableNote>,
    pub outputs: Vec<Note>,
    pub kind: TransactionKind,
    pub fee: Amount,
    pub relayer: Account,
}

impl TransactionRequest {
    pub fn deposit(outputs: Vec<Note>) -> Self {
        Self::new(Vec::new(), outputs, TransactionKind::Deposit)
    }

    pub fn transfer(inputs: Vec<SpendableNote>, outputs: Vec<Note>) -> Self {
        Self::new(inputs, outputs, TransactionKind::Transfer)
    }

    pub fn withdrawal(inputs: Vec<SpendableNote>, change: Vec<Note>, recipient: Account) -> Self {
        Self::new(
            inputs,
            change,
            TransactionKind::Withdrawal {
                recipient,
                to_l1: false,
                l1_fee: Amount::ZERO,
            },
        )
    }

    pub fn new(inputs: Vec<SpendableNote>, outputs: Vec<Note>, kind: TransactionKind) -> Self {
        Self {
            inputs,
            outputs,
            kind,
            fee: Amount::ZERO,
            relayer: Account::ZERO,
        }
    }

    /// pay `fee` to `relayer` out of the transaction value
    pub fn with_fee(mut self, fee: Amount, relayer: Account) -> Self {
        self.fee = fee;
        self.relayer = relayer;
        self
    }
}

/// a proven transaction ready for submission
#[derive(Clone, Debug)]
pub struct PreparedTransaction {
    pub bundle: ProofBundle,
    /// the outputs behind the bundle's commitments, including padding
    pub outputs: [Note; OUTPUT_COUNT],
}

/// builds proof bundles against a tree and a prover
pub struct TransactionBuilder<'a, T: TreeReader + ?Sized, P: ProofSystem + ?Sized> {
    tree: &'a T,
    prover: &'a P,
}

impl<'a, T: TreeReader + ?Sized, P: ProofSystem + ?Sized> TransactionBuilder<'a, T, P> {
    pub fn new(tree: &'a T, prover: &'a P) -> Self {
        Self { tree, prover }
    }

    pub fn prepare<R: RngCore + CryptoRng>(
        &self,
        request: TransactionRequest,
        rng: &mut R,
    ) -> Result<PreparedTransaction> {
        let TransactionRequest {
            inputs,
            outputs,
            kind,
            fee,
            relayer,
        } = request;

        let shape = TransactionShape::for_arity(inputs.len(), outputs.len())?;
        let ext_amount = external_amount(&inputs, &outputs, fee, &kind)?;
        if !fee.is_zero() && relayer.is_zero() {
            return Err(Error::MissingRecipient);
        }

        // real input nullifiers first: fails fast on foreign or uninserted notes
        let mut nullifiers = Vec::with_capacity(shape.inputs());
        let mut positions = Vec::with_capacity(inputs.len());
        for input in &inputs {
            nullifiers.push(input.note.nullifier(&input.keypair)?);
            positions.push(input.note.index().ok_or(Error::NotInserted)?);
        }

        let (root, paths) = self.tree.witness(&positions)?;
        debug!(%root, inputs = inputs.len(), ?shape, "witness read");

        let mut witness_inputs: Vec<InputWitness> = inputs
            .iter()
            .zip(paths)
            .map(|(input, path)| InputWitness {
                amount: input.note.amount(),
                private_key: input.keypair.private_key().clone(),
                blinding: *input.note.blinding(),
                position: path.position,
                path,
            })
            .collect();

        // pad with zero notes owned by throwaway keys
        while witness_inputs.len() < shape.inputs() {
            let keypair = Keypair::generate(rng);
            let note = Note::zero(keypair.address(), rng);
            let commitment = note.commitment();
            let position = Position(0);
            nullifiers.push(Nullifier::derive(
                &commitment,
                position,
                &keypair.sign(&commitment, position),
            ));
            witness_inputs.push(InputWitness {
                amount: Amount::ZERO,
                private_key: keypair.private_key().clone(),
                blinding: *note.blinding(),
                position,
                path: MerklePath {
                    siblings: Vec::new(),
                    path_bits: Vec::new(),
                    position,
                },
            });
        }

        let mut outputs = outputs;
        while outputs.len() < OUTPUT_COUNT {
            outputs.push(Note::zero(Keypair::generate(rng).address(), rng));
        }
        let outputs: [Note; OUTPUT_COUNT] = outputs
            .try_into()
            .map_err(|v: Vec<Note>| Error::InvalidArity {
                inputs: inputs.len(),
                outputs: v.len(),
            })?;

        let encrypted_outputs = [
            outputs[0].encrypt(rng)?.to_bytes(),
            outputs[1].encrypt(rng)?.to_bytes(),
        ];

        let (recipient, is_l1_withdrawal, l1_fee) = match kind {
            TransactionKind::Withdrawal {
                recipient,
                to_l1,
                l1_fee,
            } => (recipient, to_l1, l1_fee),
            TransactionKind::Deposit | TransactionKind::Transfer => {
                (Account::ZERO, false, Amount::ZERO)
            }
        };
        let ext_data = ExtData {
            recipient,
            ext_amount,
            relayer,
            fee,
            encrypted_outputs,
            is_l1_withdrawal,
            l1_fee,
        };
        let public_amount = ext_data
            .public_amount()
            .ok_or_else(|| Error::InvalidAmount("fee does not fit the public amount".into()))?;

        let signals = Signals::new(
            shape,
            root,
            public_amount,
            ext_data.hash(),
            nullifiers,
            [outputs[0].commitment(), outputs[1].commitment()],
        )?;

        let witness = Witness {
            inputs: witness_inputs,
            outputs: outputs
                .iter()
                .map(|n| OutputWitness {
                    amount: n.amount(),
                    public_key: n.owner().public_key,
                    blinding: *n.blinding(),
                })
                .collect(),
        };

        let proof = self.prover.prove(&witness, &signals)?;

        // the tree may have moved on while we were proving
        if !self.tree.is_known_root(&root) {
            return Err(Error::StaleRoot);
        }

        Ok(PreparedTransaction {
            bundle: ProofBundle {
                signals,
                proof,
                ext_data,
            },
            outputs,
        })
    }
}

/// ext = sum(outputs) + fee - sum(inputs), checked against the request kind
fn external_amount(
    inputs: &[SpendableNote],
    outputs: &[Note],
    fee: Amount,
    kind: &TransactionKind,
) -> Result<i128> {
    let overflow = || Error::InvalidAmount("note amounts overflow".into());

    let sum_in = Amount::checked_sum(inputs.iter().map(|i| i.note.amount())).ok_or_else(overflow)?;
    let sum_out = Amount::checked_sum(outputs.iter().map(|n| n.amount())).ok_or_else(overflow)?;
    let required = sum_out.checked_add(fee).ok_or_else(overflow)?;

    let sum_in_signed = i128::try_from(sum_in.0).map_err(|_| overflow())?;
    let required_signed = i128::try_from(required.0).map_err(|_| overflow())?;
    let ext = required_signed - sum_in_signed;

    match kind {
        TransactionKind::Deposit if ext < 0 => Err(Error::MissingRecipient),
        TransactionKind::Deposit => Ok(ext),
        TransactionKind::Transfer | TransactionKind::Withdrawal { .. } if ext > 0 => {
            Err(Error::InsufficientBalance {
                available: sum_in.0,
                required: required.0,
            })
        }
        TransactionKind::Transfer if ext < 0 => Err(Error::MissingRecipient),
        TransactionKind::Withdrawal { recipient, .. } if ext < 0 && recipient.is_zero() => {
            Err(Error::MissingRecipient)
        }
        TransactionKind::Transfer | TransactionKind::Withdrawal { .. } => Ok(ext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::TranscriptProver;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn inserted(tree: &mut CommitmentTree, amount: u128, kp: &Keypair, rng: &mut ChaCha20Rng) -> SpendableNote {
        let mut note = Note::new(Amount(amount), kp.address(), rng);
        let position = tree.insert(note.commitment()).unwrap();
        note.set_index(position).unwrap();
        SpendableNote::new(note, kp.clone())
    }

    #[test]
    fn test_deposit_pads_to_pair() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);

        let request = TransactionRequest::deposit(vec![Note::new(Amount(100), alice.address(), &mut rng)]);
        let prepared = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap();

        let bundle = &prepared.bundle;
        assert_eq!(bundle.signals.shape(), TransactionShape::Pair);
        assert_eq!(bundle.signals.public_amount(), 100);
        assert_eq!(bundle.ext_data.ext_amount, 100);
        assert_eq!(bundle.signals.root(), tree.root());
        assert_eq!(*bundle.signals.ext_data_hash(), bundle.ext_data.hash());
        assert_eq!(prepared.outputs[1].amount(), Amount::ZERO);
        assert!(prover.verify(&bundle.proof, &bundle.signals));
    }

    #[test]
    fn test_withdrawal_ext_amount() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let mut tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);
        let input = inserted(&mut tree, 100, &alice, &mut rng);

        let change = Note::new(Amount(20), alice.address(), &mut rng);
        let request = TransactionRequest::withdrawal(vec![input], vec![change], Account::from_label("bob"))
            .with_fee(Amount(5), Account::from_label("relayer"));
        let prepared = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap();

        // 20 + 5 - 100
        assert_eq!(prepared.bundle.ext_data.ext_amount, -75);
        assert_eq!(prepared.bundle.signals.public_amount(), -80);
        assert_eq!(prepared.bundle.ext_data.withdrawal_amount(), Amount(75));
    }

    #[test]
    fn test_batch_shape_for_three_inputs() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let mut tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);
        let inputs: Vec<_> = (0..3).map(|_| inserted(&mut tree, 10, &alice, &mut rng)).collect();

        let request = TransactionRequest::transfer(inputs, vec![Note::new(Amount(30), alice.address(), &mut rng)]);
        let prepared = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap();
        assert_eq!(prepared.bundle.signals.shape(), TransactionShape::Batch);
        assert_eq!(prepared.bundle.signals.nullifiers().len(), 16);
    }

    #[test]
    fn test_insufficient_balance() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let mut tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);
        let input = inserted(&mut tree, 10, &alice, &mut rng);

        let request = TransactionRequest::transfer(vec![input], vec![Note::new(Amount(11), alice.address(), &mut rng)]);
        let err = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap_err();
        assert_eq!(err, Error::InsufficientBalance { available: 10, required: 11 });
    }

    #[test]
    fn test_invalid_arity() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);

        let outputs = (0..3).map(|_| Note::new(Amount(1), alice.address(), &mut rng)).collect();
        let err = TransactionBuilder::new(&tree, &prover)
            .prepare(TransactionRequest::deposit(outputs), &mut rng)
            .unwrap_err();
        assert_eq!(err, Error::InvalidArity { inputs: 0, outputs: 3 });
    }

    #[test]
    fn test_transfer_cannot_leak_value() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let mut tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);
        let input = inserted(&mut tree, 10, &alice, &mut rng);

        let request = TransactionRequest::transfer(vec![input], vec![Note::new(Amount(4), alice.address(), &mut rng)]);
        let err = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap_err();
        assert_eq!(err, Error::MissingRecipient);
    }

    #[test]
    fn test_foreign_note_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);
        let mallory = Keypair::generate(&mut rng);
        let mut input = inserted(&mut tree, 10, &alice, &mut rng);
        input.keypair = mallory;

        let request = TransactionRequest::withdrawal(vec![input], vec![], Account::from_label("m"));
        let err = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap_err();
        assert_eq!(err, Error::Unauthorized);
    }

    #[test]
    fn test_fee_requires_relayer() {
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let tree = CommitmentTree::new(8, 10).unwrap();
        let prover = TranscriptProver::new([1u8; 32]);
        let alice = Keypair::generate(&mut rng);

        let request = TransactionRequest::deposit(vec![Note::new(Amount(10), alice.address(), &mut rng)])
            .with_fee(Amount(1), Account::ZERO);
        let err = TransactionBuilder::new(&tree, &prover)
            .prepare(request, &mut rng)
            .unwrap_err();
        assert_eq!(err, Error::MissingRecipient);
    }
}
