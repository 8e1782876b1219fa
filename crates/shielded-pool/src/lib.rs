//! shielded pool
//!
//! utxo-style privacy pool with a bridged deposit path. value lives in
//! notes whose commitments are appended to a merkle tree; spending a note
//! publishes its nullifier; every transition carries a proof binding the
//! two together with the external data.
//!
//! # architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SHIELDED POOL                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  wallet side                                                 │
//! │  ├─ keypair: spending key + x25519 encryption key            │
//! │  ├─ notes: commitment = H(amount, pubkey, blinding)          │
//! │  ├─ builder: pad to 2 or 16 inputs, prove off-lock           │
//! │  └─ scanner: trial-decrypt published outputs                 │
//! │                                                              │
//! │  pool side (single writer)                                   │
//! │  ├─ commitment tree + recent root window                     │
//! │  ├─ nullifier set (spent notes)                              │
//! │  ├─ proof + ext data + balance checks                        │
//! │  └─ custody: deposits, withdrawals, relayer fees, bridge     │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod builder;
pub mod commitment;
pub mod config;
pub mod custody;
pub mod error;
pub mod keys;
pub mod note;
pub mod nullifier;
pub mod pool;
pub mod proof;
pub mod scanner;
pub mod transaction;
pub mod value;

pub use bridge::{decode_bundle, encode_bundle, BridgeMessage};
pub use builder::{
    PreparedTransaction, SpendableNote, TransactionBuilder, TransactionKind, TransactionRequest,
    TreeReader,
};
pub use commitment::{CommitmentTree, MerklePath, MerkleRoot};
pub use config::PoolConfig;
pub use custody::{Account, Custody, MemoryLedger};
pub use error::{Error, Result};
pub use keys::{EncryptedPayload, Keypair, PrivateKey, PublicKey, ShieldedAddress};
pub use note::{Blinding, Note, NoteCommitment};
pub use nullifier::{Nullifier, NullifierSet, Position};
pub use pool::{CommitReceipt, PoolEvent, PoolState, PoolStateMachine};
pub use proof::{ProofSystem, TranscriptProver, Witness};
pub use scanner::{NoteScanner, ScanResult};
pub use transaction::{ExtData, Proof, ProofBundle, PublicSignals, Signals, TransactionShape};
pub use value::Amount;

/// domain separator for note commitments
pub const NOTE_DOMAIN: &[u8] = b"shielded-pool.note.v1";
/// domain separator for nullifiers
pub const NULLIFIER_DOMAIN: &[u8] = b"shielded-pool.nullifier.v1";
/// domain separator for merkle nodes
pub const MERKLE_DOMAIN: &[u8] = b"shielded-pool.merkle.v1";
/// preimage of the empty leaf
pub const ZERO_LEAF_DOMAIN: &[u8] = b"shielded-pool.zero-leaf.v1";
/// domain separator for the external data hash
pub const EXT_DATA_DOMAIN: &[u8] = b"shielded-pool.ext-data.v1";
/// transcript label for transaction proofs
pub const TRANSCRIPT_DOMAIN: &[u8] = b"shielded-pool.transaction.v1";
