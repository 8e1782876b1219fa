//! error types for the shielded pool

use thiserror::Error;

use crate::custody::Account;
use crate::nullifier::Nullifier;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // === tree ===
    #[error("commitment tree is full ({capacity} leaves)")]
    CapacityExceeded { capacity: u64 },

    #[error("merkle root is unknown or aged out of the root history")]
    StaleRoot,

    #[error("no leaf at position {0}")]
    UnknownPosition(u64),

    // === notes and keys ===
    #[error("note has not been inserted into the commitment tree")]
    NotInserted,

    #[error("note index already assigned ({0})")]
    IndexAlreadyAssigned(u64),

    #[error("keypair does not own this note")]
    Unauthorized,

    #[error("decryption failed - invalid ciphertext or wrong key")]
    DecryptionError,

    #[error("encryption failed")]
    EncryptionError,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // === transaction building ===
    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u128, required: u128 },

    #[error("unsupported arity: {inputs} inputs / {outputs} outputs")]
    InvalidArity { inputs: usize, outputs: usize },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    // === pool rejections ===
    #[error("nullifier {0} already spent")]
    DoubleSpend(Nullifier),

    #[error("invalid proof")]
    InvalidProof,

    #[error("balance mismatch: {0}")]
    BalanceMismatch(String),

    #[error("ext data hash does not match the proven public signals")]
    ExtDataMismatch,

    #[error("deposit of {amount} exceeds maximum {maximum}")]
    DepositLimitExceeded { amount: u128, maximum: u128 },

    #[error("withdrawal of {amount} below minimum {minimum}")]
    WithdrawalBelowMinimum { amount: u128, minimum: u128 },

    #[error("withdrawal or fee requires a non-zero recipient")]
    MissingRecipient,

    #[error("token {0} is not supported by this pool")]
    UnsupportedToken(Account),

    // === custody ===
    #[error("insufficient funds in {account}: have {available}, need {required}")]
    InsufficientFunds {
        account: Account,
        available: u128,
        required: u128,
    },

    // === encoding / config ===
    #[error("malformed proof bundle: {0}")]
    MalformedBundle(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// a stale root can be fixed by rebuilding the witness; everything else
    /// needs the caller to change the bundle
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::StaleRoot)
    }
}
