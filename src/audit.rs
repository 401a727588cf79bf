/// Audit challenge generation for shard storage proofs.
///
/// For every shard the client generates `n` random pre-images
/// ("challenges") and a Merkle tree the farmer is later audited against:
///
///   leaf(i) = rmd160sha256(rmd160sha256(challenge_i || shard))
///
/// The bottom level is padded with empty leaves to the next power of two.
/// Challenges and tree leaves travel with the shard descriptor to the
/// bridge; the client keeps neither once the contract is negotiated.
///
/// The generator is streaming: each challenge keeps its own SHA-256 state
/// that is fed the shard bytes as they are written to the temp file, so
/// no shard is ever buffered in memory.
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::crypto::hash;

/// Number of challenges generated per shard unless overridden.
pub const DEFAULT_CHALLENGES: usize = 3;

/// Challenge pre-image length in bytes (hex-encoded on the wire).
const CHALLENGE_BYTES: usize = 32;

/// Streaming generator for one shard's audit material.
pub struct AuditGenerator {
    challenges: Vec<String>,
    hashers: Vec<Sha256>,
}

/// Completed audit material for a shard.
///
/// `challenges` is the private record (pre-images), `tree` the public
/// record (bottom Merkle level); both are handed to the bridge in the
/// shard descriptor.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub challenges: Vec<String>,
    pub tree: Vec<String>,
    pub root: String,
}

impl AuditGenerator {
    /// Create a generator with `count` fresh random challenges.
    pub fn new(count: usize) -> Self {
        let mut rng = rand::rngs::OsRng;
        let challenges: Vec<String> = (0..count.max(1))
            .map(|_| {
                let mut pre_image = [0u8; CHALLENGE_BYTES];
                rng.fill_bytes(&mut pre_image);
                hex::encode(pre_image)
            })
            .collect();
        Self::with_challenges(challenges)
    }

    /// Create a generator over fixed challenges. Each hasher is seeded with
    /// its challenge so that `leaf = H(challenge || shard)` streams.
    pub fn with_challenges(challenges: Vec<String>) -> Self {
        let hashers = challenges
            .iter()
            .map(|challenge| {
                let mut hasher = Sha256::new();
                hasher.update(challenge.as_bytes());
                hasher
            })
            .collect();
        Self {
            challenges,
            hashers,
        }
    }

    /// Feed the next chunk of shard bytes to every challenge.
    pub fn update(&mut self, chunk: &[u8]) {
        for hasher in &mut self.hashers {
            hasher.update(chunk);
        }
    }

    /// Finalize into the audit record.
    pub fn finish(self) -> AuditRecord {
        let leaves: Vec<[u8; 20]> = self
            .hashers
            .into_iter()
            .map(|hasher| {
                let inner = hash::rmd160(&hasher.finalize());
                hash::rmd160_sha256(&inner)
            })
            .collect();

        let tree = MerkleTree::from_leaves(leaves);
        AuditRecord {
            challenges: self.challenges,
            tree: tree.bottom_hex(),
            root: hex::encode(tree.root()),
        }
    }
}

/// RIPEMD-160(SHA-256) Merkle tree over audit leaves.
///
/// The bottom level is padded with `rmd160sha256("")` to the next power of
/// two so the tree is always perfect; parents hash the concatenation of
/// their children.
pub struct MerkleTree {
    /// All levels. levels[0] = padded leaves, levels[last] = [root].
    levels: Vec<Vec<[u8; 20]>>,
}

impl MerkleTree {
    pub fn from_leaves(mut leaves: Vec<[u8; 20]>) -> Self {
        if leaves.is_empty() {
            leaves.push(empty_leaf());
        }
        let target = leaves.len().next_power_of_two();
        leaves.resize(target, empty_leaf());

        let mut levels = vec![leaves];
        // Build tree bottom-up; every level is even thanks to the padding.
        while levels.last().is_some_and(|level| level.len() > 1) {
            let current = levels.last().map(Vec::as_slice).unwrap_or_default();
            let mut next = Vec::with_capacity(current.len() / 2);
            for pair in current.chunks(2) {
                let mut joined = Vec::with_capacity(40);
                joined.extend_from_slice(&pair[0]);
                joined.extend_from_slice(&pair[1]);
                next.push(hash::rmd160_sha256(&joined));
            }
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> [u8; 20] {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_leaf)
    }

    /// Number of (padded) leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Hex-encoded bottom level, the wire form sent to the bridge.
    pub fn bottom_hex(&self) -> Vec<String> {
        self.levels
            .first()
            .map(|level| level.iter().map(hex::encode).collect())
            .unwrap_or_default()
    }
}

fn empty_leaf() -> [u8; 20] {
    hash::rmd160_sha256(b"")
}
