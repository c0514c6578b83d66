use crate::{crypto, BlockHash, PublicKeyBytes, GENESIS_PREV_HASH, TARGET};
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer};
use log::warn;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the epoch, the timestamp unit used throughout.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_nanos() as i64
}

/// The signed payload of a post.
///
/// The canonical encoding fed to signatures is the bincode encoding of
/// this struct: length-framed UTF-8 content followed by the
/// little-endian timestamp. Any mutation invalidates the signature.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct PostBody {
    pub content: String,
    pub timestamp: i64,
}

impl PostBody {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }
}

/// A user post: author key, signed body, signature over the body.
///
/// Ordering and equality are by `(body.timestamp, user)`. This is the
/// comparator that defines pool and chain-post-set membership, so two
/// posts by the same author with the same timestamp are the same
/// element regardless of in-memory representation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Post {
    pub user: PublicKeyBytes,
    pub body: PostBody,
    pub signature: Vec<u8>,
}

impl Post {
    /// Sign `content` at `timestamp` with the author's key pair.
    pub fn new(keys: &Keypair, content: String, timestamp: i64) -> Self {
        let body = PostBody { content, timestamp };
        let signature = keys.sign(&body.to_bytes()).to_bytes().to_vec();
        Post {
            user: keys.public.to_bytes(),
            body,
            signature,
        }
    }

    /// True iff the signature verifies over the body under the author key.
    pub fn verify(&self) -> bool {
        let public_key = match PublicKey::from_bytes(&self.user) {
            Ok(public_key) => public_key,
            Err(_) => return false,
        };
        let signature = match Signature::try_from(&self.signature[..]) {
            Ok(signature) => signature,
            Err(_) => return false,
        };
        public_key
            .verify_strict(&self.body.to_bytes(), &signature)
            .is_ok()
    }
}

impl PartialEq for Post {
    fn eq(&self, other: &Self) -> bool {
        self.body.timestamp == other.body.timestamp && self.user == other.user
    }
}

impl Eq for Post {}

impl Ord for Post {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.body.timestamp, &self.user).cmp(&(other.body.timestamp, &other.user))
    }
}

impl PartialOrd for Post {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns the hash over an ordered post sequence, the block summary.
pub fn summarize(posts: &[Post]) -> BlockHash {
    crypto::digest_sha_256(&bincode::serialize(posts).unwrap())
}

/// Block header. The canonical encoding hashed for proof of work and
/// chain linkage is the bincode encoding: 32 raw `prev_hash` bytes,
/// 32 raw `summary` bytes, little-endian `timestamp`, little-endian
/// `nonce`. All peers must agree on it bit-exactly.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct BlockHeader {
    pub prev_hash: BlockHash,
    pub summary: BlockHash,
    pub timestamp: i64,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }

    pub fn hash(&self) -> BlockHash {
        crypto::digest_sha_256(&self.to_bytes())
    }
}

/// True iff the first TARGET bits of `hash` are zero.
pub fn satisfies_target(hash: &BlockHash) -> bool {
    let zero_bytes = TARGET / 8;
    let zero_bits = TARGET % 8;
    if hash[..zero_bytes].iter().any(|&byte| byte != 0) {
        return false;
    }
    if zero_bits > 0 && hash[zero_bytes] >> (8 - zero_bits) != 0 {
        return false;
    }
    true
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub posts: Vec<Post>,
}

impl Block {
    /// Stage an unmined block on top of `prev_hash`, ready for the
    /// nonce search.
    pub fn stage(prev_hash: BlockHash, posts: Vec<Post>, timestamp: i64) -> Self {
        Block {
            header: BlockHeader {
                prev_hash,
                summary: summarize(&posts),
                timestamp,
                nonce: 0,
            },
            posts,
        }
    }

    /// Validates that a block is internally consistent: proof of work
    /// on the header, summary matching the post sequence, and every
    /// post individually signed. Chain linkage is not checked here.
    pub fn verify(&self) -> bool {
        if !satisfies_target(&self.header.hash()) {
            warn!("Invalid block, header does not satisfy the difficulty target");
            return false;
        }
        if self.header.summary != summarize(&self.posts) {
            warn!("Invalid block, summary does not match posts");
            return false;
        }
        if !self.posts.iter().all(Post::verify) {
            warn!("Invalid block, contains a post with a bad signature");
            return false;
        }
        true
    }
}

/// True iff `block` correctly extends the block before it.
pub fn links_to(block: &Block, prev: Option<&Block>) -> bool {
    match prev {
        Some(prev) => block.header.prev_hash == prev.header.hash(),
        None => block.header.prev_hash == GENESIS_PREV_HASH,
    }
}

/// Search nonces until `block` satisfies the target. The miner proper
/// caps its search per attempt; tests need a block no matter how long
/// it takes.
#[cfg(test)]
pub(crate) fn mine(block: &mut Block) {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    loop {
        block.header.nonce = rng.gen();
        if satisfies_target(&block.header.hash()) {
            return;
        }
    }
}
