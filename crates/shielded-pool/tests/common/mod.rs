//! shared fixtures for integration tests

#![allow(dead_code)]

use rand_chacha::ChaCha20Rng;
use shielded_pool::{
    Account, Amount, Keypair, MemoryLedger, Note, NoteScanner, PoolConfig,
    PoolStateMachine, SpendableNote, TransactionBuilder, TransactionRequest, TranscriptProver,
};
use tracing_subscriber::EnvFilter;

pub type Pool = PoolStateMachine<MemoryLedger, TranscriptProver>;

/// honours RUST_LOG, output captured per test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ether(s: &str) -> Amount {
    Amount::parse_ether(s).unwrap()
}

pub fn new_pool(config: PoolConfig, funded: &[(Account, Amount)]) -> Pool {
    let mut ledger = MemoryLedger::new();
    for (account, amount) in funded {
        ledger.mint(account, *amount);
    }
    Pool::new(config, ledger, TranscriptProver::new([42u8; 32])).unwrap()
}

/// shielded deposit of `amount` from `from` to `keypair`
pub fn deposit(
    pool: &Pool,
    from: &Account,
    keypair: &Keypair,
    amount: Amount,
    rng: &mut ChaCha20Rng,
) -> SpendableNote {
    let note = Note::new(amount, keypair.address(), rng);
    let prepared = TransactionBuilder::new(pool, pool.verifier())
        .prepare(TransactionRequest::deposit(vec![note]), rng)
        .unwrap();
    let receipt = pool.transact(from, &prepared.bundle).unwrap();
    let [mut note, _] = prepared.outputs;
    note.set_index(receipt.positions[0]).unwrap();
    SpendableNote::new(note, keypair.clone())
}

/// spendable balance of `keypair` as seen from the published outputs
pub fn shielded_balance(pool: &Pool, keypair: &Keypair) -> Amount {
    NoteScanner::new(keypair.clone())
        .scan_pool(pool)
        .unwrap()
        .balance()
}

pub fn unspent(pool: &Pool, keypair: &Keypair) -> Vec<SpendableNote> {
    NoteScanner::new(keypair.clone())
        .scan_pool(pool)
        .unwrap()
        .unspent
}
