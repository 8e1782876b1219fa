//! commitment tree
//!
//! fixed-height, append-only merkle tree of note commitments. nodes are
//! stored per level in flat arrays (`levels[l][offset]`), so appending a
//! leaf only touches one node per level. empty subtrees hash to
//! precomputed zero nodes.
//!
//! the tree keeps a bounded window of recent roots so that proofs built
//! against a slightly older root still verify after other inserts.

use core::fmt;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::note::NoteCommitment;
use crate::nullifier::Position;
use crate::{MERKLE_DOMAIN, ZERO_LEAF_DOMAIN};

/// largest supported tree height
pub const MAX_TREE_HEIGHT: usize = 32;

/// merkle root of the commitment tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MerkleRoot(pub [u8; 32]);

impl MerkleRoot {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// value of an empty leaf
pub fn zero_leaf() -> [u8; 32] {
    *blake3::hash(ZERO_LEAF_DOMAIN).as_bytes()
}

/// hash two children into their parent
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// merkle inclusion proof
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    /// sibling hashes from leaf to root
    pub siblings: Vec<[u8; 32]>,
    /// per level: true when the path node is a right child
    pub path_bits: Vec<bool>,
    /// position of the leaf
    pub position: Position,
}

impl MerklePath {
    /// fold the path over a leaf
    pub fn compute_root(&self, leaf: &NoteCommitment) -> MerkleRoot {
        let mut current = leaf.0;
        for (sibling, is_right) in self.siblings.iter().zip(&self.path_bits) {
            current = if *is_right {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }
        MerkleRoot(current)
    }

    /// verify that commitment is in tree with given root
    pub fn verify(&self, leaf: &NoteCommitment, root: &MerkleRoot) -> bool {
        self.siblings.len() == self.path_bits.len() && self.compute_root(leaf) == *root
    }
}

/// ring buffer of the most recent roots
#[derive(Clone, Debug)]
struct RootHistory {
    roots: VecDeque<MerkleRoot>,
    capacity: usize,
}

impl RootHistory {
    fn new(capacity: usize, initial: MerkleRoot) -> Self {
        let mut roots = VecDeque::with_capacity(capacity);
        roots.push_back(initial);
        Self { roots, capacity }
    }

    fn push(&mut self, root: MerkleRoot) {
        if self.roots.len() == self.capacity {
            self.roots.pop_front();
        }
        self.roots.push_back(root);
    }

    fn contains(&self, root: &MerkleRoot) -> bool {
        // newest first: fresh proofs are the common case
        self.roots.iter().rev().any(|r| r == root)
    }
}

/// append-only commitment tree
#[derive(Clone, Debug)]
pub struct CommitmentTree {
    height: usize,
    /// levels[0] = leaves, levels[height] = [root]
    levels: Vec<Vec<[u8; 32]>>,
    /// zeros[l] = root of an empty subtree of height l
    zeros: Vec<[u8; 32]>,
    history: RootHistory,
}

impl CommitmentTree {
    /// create an empty tree of `height` keeping the last `root_history` roots
    pub fn new(height: usize, root_history: usize) -> Result<Self> {
        if height == 0 || height > MAX_TREE_HEIGHT {
            return Err(Error::Config(format!(
                "tree height must be in 1..={MAX_TREE_HEIGHT}, got {height}"
            )));
        }
        if root_history == 0 {
            return Err(Error::Config("root history must keep at least one root".into()));
        }

        let mut zeros = Vec::with_capacity(height + 1);
        zeros.push(zero_leaf());
        for l in 0..height {
            zeros.push(hash_pair(&zeros[l], &zeros[l]));
        }
        let empty_root = MerkleRoot(zeros[height]);

        Ok(Self {
            height,
            levels: vec![Vec::new(); height + 1],
            zeros,
            history: RootHistory::new(root_history, empty_root),
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// maximum number of leaves
    pub fn capacity(&self) -> u64 {
        1u64 << self.height
    }

    /// number of notes in tree
    pub fn len(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// free leaf slots
    pub fn remaining(&self) -> u64 {
        self.capacity() - self.len()
    }

    /// current root
    pub fn root(&self) -> MerkleRoot {
        match self.levels[self.height].first() {
            Some(root) => MerkleRoot(*root),
            None => MerkleRoot(self.zeros[self.height]),
        }
    }

    /// whether `root` is the current root or still inside the history window
    pub fn is_known_root(&self, root: &MerkleRoot) -> bool {
        if root.0 == [0u8; 32] {
            return false;
        }
        self.history.contains(root)
    }

    pub fn leaf(&self, position: Position) -> Option<NoteCommitment> {
        self.levels[0]
            .get(position.0 as usize)
            .copied()
            .map(NoteCommitment)
    }

    /// append a note commitment, returns its position
    pub fn insert(&mut self, commitment: NoteCommitment) -> Result<Position> {
        let [position] = self.insert_batch([commitment])?;
        Ok(position)
    }

    /// append several commitments as one step: either all go in or none,
    /// and only the final root enters the history
    pub fn insert_batch<const N: usize>(
        &mut self,
        commitments: [NoteCommitment; N],
    ) -> Result<[Position; N]> {
        if self.remaining() < N as u64 {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        let mut positions = [Position::default(); N];
        for (slot, commitment) in positions.iter_mut().zip(commitments) {
            *slot = self.append(commitment);
        }

        let root = self.root();
        self.history.push(root);
        debug!(first = ?positions.first(), count = N, %root, "commitments inserted");
        Ok(positions)
    }

    /// write one leaf and its ancestors; capacity is checked by the caller
    fn append(&mut self, commitment: NoteCommitment) -> Position {
        let position = self.len();
        self.levels[0].push(commitment.0);
        let mut offset = position as usize;
        for level in 0..self.height {
            let left = offset & !1;
            let l = self.levels[level][left];
            let r = self.node_or_zero(level, left + 1);
            let parent = hash_pair(&l, &r);

            offset >>= 1;
            let next = &mut self.levels[level + 1];
            if offset < next.len() {
                next[offset] = parent;
            } else {
                next.push(parent);
            }
        }
        Position(position)
    }

    /// merkle witness for a previously inserted leaf against the current root
    pub fn path_to(&self, position: Position) -> Result<MerklePath> {
        if position.0 >= self.len() {
            return Err(Error::UnknownPosition(position.0));
        }

        let mut siblings = Vec::with_capacity(self.height);
        let mut path_bits = Vec::with_capacity(self.height);
        let mut offset = position.0 as usize;
        for level in 0..self.height {
            siblings.push(self.node_or_zero(level, offset ^ 1));
            path_bits.push(offset & 1 == 1);
            offset >>= 1;
        }

        Ok(MerklePath {
            siblings,
            path_bits,
            position,
        })
    }

    fn node_or_zero(&self, level: usize, offset: usize) -> [u8; 32] {
        self.levels[level]
            .get(offset)
            .copied()
            .unwrap_or(self.zeros[level])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> NoteCommitment {
        NoteCommitment([n; 32])
    }

    #[test]
    fn test_merkle_tree() {
        let mut tree = CommitmentTree::new(16, 100).unwrap();
        let empty = tree.root();

        let p1 = tree.insert(leaf(1)).unwrap();
        let root1 = tree.root();
        let p2 = tree.insert(leaf(2)).unwrap();
        let root2 = tree.root();
        let p3 = tree.insert(leaf(3)).unwrap();
        let root3 = tree.root();

        assert_eq!((p1, p2, p3), (Position(0), Position(1), Position(2)));

        // roots should change
        assert_ne!(empty, root1);
        assert_ne!(root1, root2);
        assert_ne!(root2, root3);

        // proofs should verify against the current root
        for (p, c) in [(p1, leaf(1)), (p2, leaf(2)), (p3, leaf(3))] {
            let path = tree.path_to(p).unwrap();
            assert_eq!(path.siblings.len(), 16);
            assert!(path.verify(&c, &root3));
        }

        // wrong commitment should fail
        assert!(!tree.path_to(p1).unwrap().verify(&leaf(2), &root3));
    }

    #[test]
    fn test_empty_root_matches_zero_subtree() {
        let tree = CommitmentTree::new(3, 10).unwrap();
        let z0 = zero_leaf();
        let z1 = hash_pair(&z0, &z0);
        let z2 = hash_pair(&z1, &z1);
        assert_eq!(tree.root(), MerkleRoot(hash_pair(&z2, &z2)));
        assert!(tree.is_known_root(&tree.root()));
    }

    #[test]
    fn test_root_matches_full_recompute() {
        let mut tree = CommitmentTree::new(3, 10).unwrap();
        for i in 0..5 {
            tree.insert(leaf(i)).unwrap();
        }

        let mut level: Vec<[u8; 32]> = (0..8)
            .map(|i| if i < 5 { [i as u8; 32] } else { zero_leaf() })
            .collect();
        while level.len() > 1 {
            level = level.chunks(2).map(|c| hash_pair(&c[0], &c[1])).collect();
        }
        assert_eq!(tree.root(), MerkleRoot(level[0]));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut tree = CommitmentTree::new(2, 10).unwrap();
        for i in 0..4 {
            tree.insert(leaf(i)).unwrap();
        }
        assert_eq!(tree.remaining(), 0);
        let root = tree.root();
        assert_eq!(
            tree.insert(leaf(9)),
            Err(Error::CapacityExceeded { capacity: 4 })
        );
        // failed insert leaves the tree untouched
        assert_eq!(tree.root(), root);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_root_history_window() {
        let mut tree = CommitmentTree::new(8, 3).unwrap();
        let empty = tree.root();
        tree.insert(leaf(1)).unwrap();
        let r1 = tree.root();
        tree.insert(leaf(2)).unwrap();
        let r2 = tree.root();

        assert!(tree.is_known_root(&empty));
        assert!(tree.is_known_root(&r1));
        assert!(tree.is_known_root(&r2));

        tree.insert(leaf(3)).unwrap();
        // window of 3 now holds r1, r2, r3
        assert!(!tree.is_known_root(&empty));
        assert!(tree.is_known_root(&r1));

        assert!(!tree.is_known_root(&MerkleRoot([0u8; 32])));
    }

    #[test]
    fn test_batch_insert_records_one_root() {
        let mut tree = CommitmentTree::new(8, 2).unwrap();
        let empty = tree.root();

        let mut half = tree.clone();
        half.insert(leaf(1)).unwrap();

        let positions = tree.insert_batch([leaf(1), leaf(2)]).unwrap();
        assert_eq!(positions, [Position(0), Position(1)]);

        // the intermediate one-leaf root was never a committed state
        assert!(!tree.is_known_root(&half.root()));
        assert!(tree.is_known_root(&empty));

        // a window of two holds two batches
        let first = tree.root();
        tree.insert_batch([leaf(3), leaf(4)]).unwrap();
        assert!(tree.is_known_root(&first));
        assert!(!tree.is_known_root(&empty));
    }

    #[test]
    fn test_batch_insert_is_all_or_nothing() {
        let mut tree = CommitmentTree::new(2, 10).unwrap();
        tree.insert_batch([leaf(1), leaf(2), leaf(3)]).unwrap();
        let root = tree.root();
        assert_eq!(
            tree.insert_batch([leaf(4), leaf(5)]),
            Err(Error::CapacityExceeded { capacity: 4 })
        );
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn test_path_to_unknown_position() {
        let mut tree = CommitmentTree::new(4, 4).unwrap();
        tree.insert(leaf(1)).unwrap();
        assert_eq!(tree.path_to(Position(1)), Err(Error::UnknownPosition(1)));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(CommitmentTree::new(0, 10).is_err());
        assert!(CommitmentTree::new(33, 10).is_err());
        assert!(CommitmentTree::new(4, 0).is_err());
    }
}
