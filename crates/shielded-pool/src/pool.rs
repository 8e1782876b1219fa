//! pool state machine
//!
//! the single authoritative ledger: commitment tree, spent nullifiers and
//! external-amount accounting. every transition goes through one write lock:
//!
//! ```text
//! submit / transact / on_token_bridged
//!        │
//!        ▼  (write lock)
//!   1. root known ─────────── StaleRoot
//!   2. nullifiers unspent ─── DoubleSpend
//!   3. proof verifies ─────── InvalidProof
//!   4. ext data + balance ─── ExtDataMismatch / BalanceMismatch / ...
//!   5. custody, tree, nullifiers, events
//! ```
//!
//! a rejected bundle leaves the state exactly as it was.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::bridge::{decode_bundle, BridgeMessage};
use crate::builder::TreeReader;
use crate::commitment::{CommitmentTree, MerklePath, MerkleRoot};
use crate::config::PoolConfig;
use crate::custody::{Account, Custody};
use crate::error::{Error, Result};
use crate::keys::ShieldedAddress;
use crate::note::NoteCommitment;
use crate::nullifier::{Nullifier, NullifierSet, Position};
use crate::proof::ProofSystem;
use crate::transaction::{ProofBundle, OUTPUT_COUNT};
use crate::value::Amount;

/// published by the pool, consumed by wallets and relayers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    NewCommitment {
        commitment: NoteCommitment,
        index: Position,
        encrypted_output: Vec<u8>,
    },
    NewNullifier {
        nullifier: Nullifier,
    },
    /// an account announced its shielded address
    PublicKey {
        owner: Account,
        address: ShieldedAddress,
    },
    /// tokens handed to the l1 bridge for `recipient`
    L1Withdrawal {
        recipient: Account,
        amount: Amount,
        l1_fee: Amount,
    },
}

/// outcome of a committed transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub root: MerkleRoot,
    pub positions: [Position; OUTPUT_COUNT],
    pub nullifiers: Vec<Nullifier>,
    pub ext_amount: i128,
    pub fee: Amount,
}

/// tree, spent set and the last committed root
#[derive(Clone, Debug)]
pub struct PoolState {
    tree: CommitmentTree,
    spent: NullifierSet,
    last_root: MerkleRoot,
}

impl PoolState {
    fn new(config: &PoolConfig) -> Result<Self> {
        let tree = CommitmentTree::new(config.tree_height, config.root_history_size)?;
        let last_root = tree.root();
        Ok(Self {
            tree,
            spent: NullifierSet::new(),
            last_root,
        })
    }

    pub fn tree(&self) -> &CommitmentTree {
        &self.tree
    }

    pub fn spent(&self) -> &NullifierSet {
        &self.spent
    }

    pub fn last_root(&self) -> MerkleRoot {
        self.last_root
    }
}

/// how the positive ext amount of a bundle is paid for
#[derive(Clone, Copy, Debug)]
enum Funding {
    /// nothing; the bundle may not bring value in
    None,
    /// pulled from this account on commit
    Depositor(Account),
    /// already moved into pool custody by the bridge
    Bridged { sent: Amount },
}

struct PoolInner<C> {
    state: PoolState,
    custody: C,
    events: Vec<PoolEvent>,
    registry: HashMap<Account, ShieldedAddress>,
    /// pool custody balance after the last transition
    last_balance: Amount,
}

/// the shielded pool
pub struct PoolStateMachine<C: Custody, P: ProofSystem> {
    config: PoolConfig,
    verifier: P,
    inner: RwLock<PoolInner<C>>,
}

impl<C: Custody, P: ProofSystem> PoolStateMachine<C, P> {
    pub fn new(config: PoolConfig, custody: C, verifier: P) -> Result<Self> {
        config.validate()?;
        let state = PoolState::new(&config)?;
        let last_balance = custody.balance_of(&config.pool_account);
        Ok(Self {
            config,
            verifier,
            inner: RwLock::new(PoolInner {
                state,
                custody,
                events: Vec::new(),
                registry: HashMap::new(),
                last_balance,
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn verifier(&self) -> &P {
        &self.verifier
    }

    /// submit a bundle that brings no value in (transfer or withdrawal)
    pub fn submit(&self, bundle: &ProofBundle) -> Result<CommitReceipt> {
        let mut inner = self.inner.write();
        self.process(&mut inner, bundle, Funding::None)
    }

    /// submit a bundle whose deposit is pulled from `depositor`
    pub fn transact(&self, depositor: &Account, bundle: &ProofBundle) -> Result<CommitReceipt> {
        let mut inner = self.inner.write();
        self.process(&mut inner, bundle, Funding::Depositor(*depositor))
    }

    /// announce a shielded address for `owner`
    pub fn register(&self, owner: Account, address: ShieldedAddress) {
        let mut inner = self.inner.write();
        Self::register_locked(&mut inner, owner, address);
    }

    /// register and deposit in one transition; nothing is registered if the
    /// bundle is rejected
    pub fn register_and_transact(
        &self,
        owner: Account,
        address: ShieldedAddress,
        bundle: &ProofBundle,
    ) -> Result<CommitReceipt> {
        let mut inner = self.inner.write();
        let receipt = self.process(&mut inner, bundle, Funding::Depositor(owner))?;
        Self::register_locked(&mut inner, owner, address);
        Ok(receipt)
    }

    /// bridged deposit: the bridge has already credited `message.amount` to
    /// the pool account. funds the pool does not keep go to the multisig; if
    /// that transfer fails they stay in custody but never fund a later deposit.
    pub fn on_token_bridged(&self, message: &BridgeMessage) -> Result<CommitReceipt> {
        if message.token != self.config.token {
            warn!(token = %message.token, "bridged token not supported");
            return Err(Error::UnsupportedToken(message.token));
        }

        let mut inner = self.inner.write();
        let balance = inner.custody.balance_of(&self.config.pool_account);
        let sent = balance.saturating_sub(inner.last_balance);

        let result = decode_bundle(&message.data).and_then(|bundle| {
            if message.amount.0 < bundle.ext_data.deposit_amount().0 {
                return Err(Error::BalanceMismatch(format!(
                    "bridge reported {} but bundle deposits {}",
                    message.amount,
                    bundle.ext_data.deposit_amount()
                )));
            }
            self.process(&mut inner, &bundle, Funding::Bridged { sent })
        });

        if let Err(e) = &result {
            warn!(error = %e, %sent, "bridged bundle rejected, forwarding to multisig");
            if let Err(forward) = inner.custody.transfer(
                &self.config.pool_account,
                &self.config.multisig,
                sent,
            ) {
                warn!(error = %forward, %sent, "forward to multisig failed, funds stay in the pool");
            }
            // whatever stayed behind is not credited to the next bridged deposit
            inner.last_balance = inner.custody.balance_of(&self.config.pool_account);
        } else {
            info!(amount = %message.amount, "bridged deposit committed");
        }
        result
    }

    pub fn root(&self) -> MerkleRoot {
        self.inner.read().state.tree.root()
    }

    pub fn last_root(&self) -> MerkleRoot {
        self.inner.read().state.last_root
    }

    pub fn is_known_root(&self, root: &MerkleRoot) -> bool {
        self.inner.read().state.tree.is_known_root(root)
    }

    pub fn is_spent(&self, nullifier: &Nullifier) -> bool {
        self.inner.read().state.spent.contains(nullifier)
    }

    pub fn path_to(&self, position: Position) -> Result<MerklePath> {
        self.inner.read().state.tree.path_to(position)
    }

    pub fn commitment_count(&self) -> u64 {
        self.inner.read().state.tree.len()
    }

    /// run `f` against a consistent snapshot of the pool state
    pub fn read_state<R>(&self, f: impl FnOnce(&PoolState) -> R) -> R {
        f(&self.inner.read().state)
    }

    pub fn events(&self) -> Vec<PoolEvent> {
        self.inner.read().events.clone()
    }

    /// events published at or after `from`
    pub fn events_since(&self, from: usize) -> Vec<PoolEvent> {
        let inner = self.inner.read();
        inner.events.get(from..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn registered_address(&self, owner: &Account) -> Option<ShieldedAddress> {
        self.inner.read().registry.get(owner).copied()
    }

    pub fn balance_of(&self, account: &Account) -> Amount {
        self.inner.read().custody.balance_of(account)
    }

    /// tokens held by the pool account
    pub fn pool_balance(&self) -> Amount {
        self.balance_of(&self.config.pool_account)
    }

    /// custody balance recorded after the last transition
    pub fn last_balance(&self) -> Amount {
        self.inner.read().last_balance
    }

    /// direct access to custody, e.g. to fund accounts or simulate a bridge
    /// credit before `on_token_bridged`
    pub fn with_custody<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.inner.write().custody)
    }

    fn register_locked(inner: &mut PoolInner<C>, owner: Account, address: ShieldedAddress) {
        inner.registry.insert(owner, address);
        inner.events.push(PoolEvent::PublicKey { owner, address });
        info!(%owner, "shielded address registered");
    }

    fn process(
        &self,
        inner: &mut PoolInner<C>,
        bundle: &ProofBundle,
        funding: Funding,
    ) -> Result<CommitReceipt> {
        match self.validate(inner, bundle, funding) {
            Ok(()) => self.commit(inner, bundle, funding),
            Err(e) => {
                warn!(reason = %e, root = %bundle.signals.root(), "bundle rejected");
                Err(e)
            }
        }
    }

    /// steps 1-4, read only
    fn validate(&self, inner: &PoolInner<C>, bundle: &ProofBundle, funding: Funding) -> Result<()> {
        let state = &inner.state;
        let signals = &bundle.signals;
        let ext = &bundle.ext_data;

        // 1. anchor
        if !state.tree.is_known_root(&signals.root()) {
            return Err(Error::StaleRoot);
        }

        // 2. nullifiers
        let nullifiers = signals.nullifiers();
        for (i, nf) in nullifiers.iter().enumerate() {
            if state.spent.contains(nf) || nullifiers[..i].contains(nf) {
                return Err(Error::DoubleSpend(*nf));
            }
        }

        // 3. proof
        if !self.verifier.verify(&bundle.proof, signals) {
            return Err(Error::InvalidProof);
        }

        // 4. external data and balance
        if ext.hash() != *signals.ext_data_hash() {
            return Err(Error::ExtDataMismatch);
        }
        if ext.public_amount() != Some(signals.public_amount()) {
            return Err(Error::BalanceMismatch(format!(
                "public amount {} != ext amount {} - fee {}",
                signals.public_amount(),
                ext.ext_amount,
                ext.fee
            )));
        }

        let deposit = ext.deposit_amount();
        let withdrawal = ext.withdrawal_amount();
        if deposit > self.config.maximum_deposit_amount {
            return Err(Error::DepositLimitExceeded {
                amount: deposit.0,
                maximum: self.config.maximum_deposit_amount.0,
            });
        }
        if !withdrawal.is_zero() {
            if ext.recipient.is_zero() {
                return Err(Error::MissingRecipient);
            }
            if ext.is_l1_withdrawal && withdrawal < self.config.minimum_withdrawal_amount {
                return Err(Error::WithdrawalBelowMinimum {
                    amount: withdrawal.0,
                    minimum: self.config.minimum_withdrawal_amount.0,
                });
            }
        }
        if !ext.fee.is_zero() && ext.relayer.is_zero() {
            return Err(Error::MissingRecipient);
        }

        let pool = &self.config.pool_account;
        let inflow = match funding {
            _ if deposit.is_zero() => Amount::ZERO,
            Funding::None => {
                return Err(Error::BalanceMismatch(format!(
                    "deposit of {deposit} has no funding source"
                )))
            }
            Funding::Depositor(from) => {
                let available = inner.custody.balance_of(&from);
                if available < deposit {
                    return Err(Error::InsufficientFunds {
                        account: from,
                        available: available.0,
                        required: deposit.0,
                    });
                }
                deposit
            }
            Funding::Bridged { sent } => {
                if sent < deposit {
                    return Err(Error::BalanceMismatch(format!(
                        "bridge delivered {sent}, bundle deposits {deposit}"
                    )));
                }
                // already in custody
                Amount::ZERO
            }
        };

        let outflow = withdrawal
            .checked_add(ext.fee)
            .ok_or_else(|| Error::BalanceMismatch("outflow overflows".into()))?;
        let available = inner.custody.balance_of(pool).saturating_add(inflow);
        if available < outflow {
            return Err(Error::InsufficientFunds {
                account: *pool,
                available: available.0,
                required: outflow.0,
            });
        }

        if state.tree.remaining() < OUTPUT_COUNT as u64 {
            return Err(Error::CapacityExceeded {
                capacity: state.tree.capacity(),
            });
        }

        Ok(())
    }

    /// step 5: apply a validated bundle
    fn commit(
        &self,
        inner: &mut PoolInner<C>,
        bundle: &ProofBundle,
        funding: Funding,
    ) -> Result<CommitReceipt> {
        let ext = &bundle.ext_data;
        let signals = &bundle.signals;
        let pool = self.config.pool_account;
        let deposit = ext.deposit_amount();
        let withdrawal = ext.withdrawal_amount();

        // custody first: validation checked every balance these moves need
        match funding {
            Funding::Depositor(from) => inner.custody.transfer(&from, &pool, deposit)?,
            Funding::Bridged { sent } => {
                let surplus = sent.saturating_sub(deposit);
                inner.custody.transfer(&pool, &self.config.multisig, surplus)?;
            }
            Funding::None => {}
        }
        if !withdrawal.is_zero() {
            if ext.is_l1_withdrawal {
                inner
                    .custody
                    .transfer(&pool, &self.config.l1_bridge, withdrawal)?;
                inner.events.push(PoolEvent::L1Withdrawal {
                    recipient: ext.recipient,
                    amount: withdrawal,
                    l1_fee: ext.l1_fee,
                });
            } else {
                inner.custody.transfer(&pool, &ext.recipient, withdrawal)?;
            }
        }
        inner.custody.transfer(&pool, &ext.relayer, ext.fee)?;

        let state = &mut inner.state;
        let positions = state.tree.insert_batch(*signals.commitments())?;
        for nf in signals.nullifiers() {
            state.spent.insert(*nf)?;
        }
        state.last_root = state.tree.root();
        let root = state.last_root;

        for (i, commitment) in signals.commitments().iter().enumerate() {
            inner.events.push(PoolEvent::NewCommitment {
                commitment: *commitment,
                index: positions[i],
                encrypted_output: ext.encrypted_outputs[i].clone(),
            });
        }
        for nf in signals.nullifiers() {
            inner.events.push(PoolEvent::NewNullifier { nullifier: *nf });
        }
        inner.last_balance = inner.custody.balance_of(&pool);

        info!(
            %root,
            first_index = positions[0].0,
            nullifiers = signals.nullifiers().len(),
            ext_amount = ext.ext_amount,
            fee = %ext.fee,
            "transaction committed"
        );

        Ok(CommitReceipt {
            root,
            positions,
            nullifiers: signals.nullifiers().to_vec(),
            ext_amount: ext.ext_amount,
            fee: ext.fee,
        })
    }
}

impl<C: Custody, P: ProofSystem> TreeReader for PoolStateMachine<C, P> {
    fn witness(&self, positions: &[Position]) -> Result<(MerkleRoot, Vec<MerklePath>)> {
        let inner = self.inner.read();
        TreeReader::witness(&inner.state.tree, positions)
    }

    fn is_known_root(&self, root: &MerkleRoot) -> bool {
        PoolStateMachine::is_known_root(self, root)
    }
}
