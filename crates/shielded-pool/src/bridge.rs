//! bridged deposits
//!
//! the bridge relays tokens from another ledger together with an encoded
//! proof bundle. the bundle uses a flat 32-byte word layout:
//!
//! ```text
//! word        field
//! ─────────── ──────────────────────────────────────────────
//! 0           input count (2 or 16)
//! 1           proof length L, then ceil(L/32) words
//! .           root
//! .           public amount (int256, two's complement)
//! .           ext data hash
//! .           N input nullifiers
//! .           2 output commitments
//! .           recipient (address, left padded)
//! .           ext amount (int256)
//! .           relayer (address)
//! .           fee (uint256)
//! .           is l1 withdrawal (bool)
//! .           l1 fee (uint256)
//! .           encrypted output 1 (length + padded bytes)
//! .           encrypted output 2 (length + padded bytes)
//! ```
//!
//! decoding is strict: non-canonical padding, out of range integers and
//! trailing bytes are all rejected.

use crate::commitment::MerkleRoot;
use crate::custody::Account;
use crate::error::{Error, Result};
use crate::note::NoteCommitment;
use crate::nullifier::Nullifier;
use crate::transaction::{ExtData, Proof, ProofBundle, Signals, TransactionShape, OUTPUT_COUNT};
use crate::value::Amount;

const WORD: usize = 32;

/// message delivered by the bridge adapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeMessage {
    pub token: Account,
    /// amount the bridge credited to the pool
    pub amount: Amount,
    /// `encode_bundle` output
    pub data: Vec<u8>,
}

impl BridgeMessage {
    pub fn new(token: Account, amount: Amount, bundle: &ProofBundle) -> Self {
        Self {
            token,
            amount,
            data: encode_bundle(bundle),
        }
    }
}

pub fn encode_bundle(bundle: &ProofBundle) -> Vec<u8> {
    let mut w = WordWriter::default();
    let signals = &bundle.signals;
    let ext = &bundle.ext_data;

    w.uint(signals.shape().inputs() as u128);
    w.bytes(bundle.proof.as_bytes());
    w.word(&signals.root().0);
    w.int(signals.public_amount());
    w.word(signals.ext_data_hash());
    for nf in signals.nullifiers() {
        w.word(&nf.0);
    }
    for cm in signals.commitments() {
        w.word(&cm.0);
    }

    w.address(&ext.recipient);
    w.int(ext.ext_amount);
    w.address(&ext.relayer);
    w.uint(ext.fee.0);
    w.uint(ext.is_l1_withdrawal as u128);
    w.uint(ext.l1_fee.0);
    for output in &ext.encrypted_outputs {
        w.bytes(output);
    }
    w.buf
}

pub fn decode_bundle(data: &[u8]) -> Result<ProofBundle> {
    let mut r = WordReader::new(data)?;

    let inputs = r.uint()?;
    let shape = usize::try_from(inputs)
        .ok()
        .and_then(TransactionShape::from_inputs)
        .ok_or_else(|| malformed(format!("unsupported input count {inputs}")))?;
    let proof = Proof(r.bytes()?);
    let root = MerkleRoot(r.word()?);
    let public_amount = r.int()?;
    let ext_data_hash = r.word()?;
    let nullifiers = (0..shape.inputs())
        .map(|_| r.word().map(Nullifier))
        .collect::<Result<Vec<_>>>()?;
    let commitments = [NoteCommitment(r.word()?), NoteCommitment(r.word()?)];

    let recipient = r.address()?;
    let ext_amount = r.int()?;
    let relayer = r.address()?;
    let fee = Amount(r.uint()?);
    let is_l1_withdrawal = match r.uint()? {
        0 => false,
        1 => true,
        other => return Err(malformed(format!("invalid bool word {other}"))),
    };
    let l1_fee = Amount(r.uint()?);
    let encrypted_outputs: [Vec<u8>; OUTPUT_COUNT] = [r.bytes()?, r.bytes()?];
    r.finish()?;

    let signals = Signals::new(
        shape,
        root,
        public_amount,
        ext_data_hash,
        nullifiers,
        commitments,
    )?;
    Ok(ProofBundle {
        signals,
        proof,
        ext_data: ExtData {
            recipient,
            ext_amount,
            relayer,
            fee,
            encrypted_outputs,
            is_l1_withdrawal,
            l1_fee,
        },
    })
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedBundle(msg.into())
}

#[derive(Default)]
struct WordWriter {
    buf: Vec<u8>,
}

impl WordWriter {
    fn word(&mut self, word: &[u8; WORD]) {
        self.buf.extend_from_slice(word);
    }

    fn uint(&mut self, value: u128) {
        let mut word = [0u8; WORD];
        word[16..].copy_from_slice(&value.to_be_bytes());
        self.word(&word);
    }

    fn int(&mut self, value: i128) {
        let fill = if value < 0 { 0xff } else { 0x00 };
        let mut word = [fill; WORD];
        word[16..].copy_from_slice(&value.to_be_bytes());
        self.word(&word);
    }

    fn address(&mut self, account: &Account) {
        let mut word = [0u8; WORD];
        word[12..].copy_from_slice(&account.0);
        self.word(&word);
    }

    fn bytes(&mut self, data: &[u8]) {
        self.uint(data.len() as u128);
        self.buf.extend_from_slice(data);
        let pad = (WORD - data.len() % WORD) % WORD;
        self.buf.resize(self.buf.len() + pad, 0);
    }
}

struct WordReader<'a> {
    words: &'a [u8],
    offset: usize,
}

impl<'a> WordReader<'a> {
    fn new(words: &'a [u8]) -> Result<Self> {
        if words.len() % WORD != 0 {
            return Err(malformed(format!(
                "length {} is not a multiple of {WORD}",
                words.len()
            )));
        }
        Ok(Self { words, offset: 0 })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.words.len())
            .ok_or_else(|| malformed("unexpected end of data"))?;
        let slice = &self.words[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; WORD]> {
        let mut word = [0u8; WORD];
        word.copy_from_slice(self.take(WORD)?);
        Ok(word)
    }

    fn uint(&mut self) -> Result<u128> {
        let word = self.word()?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(malformed("uint256 out of range"));
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(low))
    }

    fn int(&mut self) -> Result<i128> {
        let word = self.word()?;
        let mut low = [0u8; 16];
        low.copy_from_slice(&word[16..]);
        let value = i128::from_be_bytes(low);
        // high half must be the sign extension of the low half
        let fill = if value < 0 { 0xff } else { 0x00 };
        if word[..16].iter().any(|b| *b != fill) {
            return Err(malformed("int256 out of range"));
        }
        Ok(value)
    }

    fn address(&mut self) -> Result<Account> {
        let word = self.word()?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(malformed("dirty address padding"));
        }
        let mut account = [0u8; 20];
        account.copy_from_slice(&word[12..]);
        Ok(Account(account))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.uint()?).map_err(|_| malformed("length overflow"))?;
        let data = self.take(len)?.to_vec();
        let pad = (WORD - len % WORD) % WORD;
        if self.take(pad)?.iter().any(|b| *b != 0) {
            return Err(malformed("dirty byte padding"));
        }
        Ok(data)
    }

    fn finish(self) -> Result<()> {
        if self.offset != self.words.len() {
            return Err(malformed(format!(
                "{} trailing bytes",
                self.words.len() - self.offset
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(shape: TransactionShape) -> ProofBundle {
        let nullifiers = (0..shape.inputs()).map(|i| Nullifier([i as u8 + 1; 32])).collect();
        ProofBundle {
            signals: Signals::new(
                shape,
                MerkleRoot([0xaa; 32]),
                -85,
                [0xbb; 32],
                nullifiers,
                [NoteCommitment([0xcc; 32]), NoteCommitment([0xdd; 32])],
            )
            .unwrap(),
            proof: Proof(vec![7u8; 64]),
            ext_data: ExtData {
                recipient: Account::from_label("alice"),
                ext_amount: -80,
                relayer: Account::from_label("relayer"),
                fee: Amount(5),
                encrypted_outputs: [vec![1u8; 108], vec![2u8; 33]],
                is_l1_withdrawal: true,
                l1_fee: Amount(3),
            },
        }
    }

    #[test]
    fn test_encode_decode() {
        for shape in [TransactionShape::Pair, TransactionShape::Batch] {
            let original = bundle(shape);
            let data = encode_bundle(&original);
            assert_eq!(data.len() % WORD, 0);
            assert_eq!(decode_bundle(&data).unwrap(), original);
        }
    }

    #[test]
    fn test_negative_amount_is_sign_extended() {
        let data = encode_bundle(&bundle(TransactionShape::Pair));
        // word 0 shape, word 1 proof length, 2 proof words, root, then public amount
        let public_amount = &data[5 * WORD..6 * WORD];
        assert!(public_amount[..16].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn test_rejects_malformed() {
        let data = encode_bundle(&bundle(TransactionShape::Pair));

        // truncated
        assert!(matches!(
            decode_bundle(&data[..data.len() - WORD]),
            Err(Error::MalformedBundle(_))
        ));
        // not word aligned
        assert!(decode_bundle(&data[..data.len() - 1]).is_err());
        // trailing word
        let mut long = data.clone();
        long.extend_from_slice(&[0u8; WORD]);
        assert!(decode_bundle(&long).is_err());
        // unsupported shape
        let mut shape = data.clone();
        shape[WORD - 1] = 3;
        assert!(decode_bundle(&shape).is_err());
        // dirty padding in the last encrypted output (33 bytes + 31 padding)
        let mut dirty = data;
        let last = dirty.len() - 1;
        dirty[last] = 1;
        assert!(decode_bundle(&dirty).is_err());
    }
}
