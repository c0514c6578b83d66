use crate::block::{links_to, Block, Post};
use crate::{BlockHash, GENESIS_PREV_HASH};
use log::info;
use std::collections::BTreeSet;
use thiserror::Error;

/// Why a post was refused admission to the pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("invalid post")]
    InvalidSignature,
    #[error("duplicated post on the blockchain")]
    DuplicateInChain,
    #[error("duplicated post in the pool")]
    DuplicateInPool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("posts are invalid")]
    InvalidPost,
}

/// Validates `chain` as a whole: every block internally consistent,
/// genesis anchored at the zero sentinel, hashes linking, and no post
/// appearing twice. Returns the chain's post set on success.
pub fn validate_chain(chain: &[Block]) -> Option<BTreeSet<Post>> {
    let mut posts = BTreeSet::new();
    let mut prev: Option<&Block> = None;
    for block in chain {
        if !block.verify() || !links_to(block, prev) {
            return None;
        }
        for post in &block.posts {
            if !posts.insert(post.clone()) {
                return None;
            }
        }
        prev = Some(block);
    }
    Some(posts)
}

/// The miner's chain and pool. One value of this type sits behind the
/// node's readers/writer lock; every method is a complete state
/// transition, so the invariants below hold between any two calls:
///
/// - `chain` validates as a chain,
/// - `chain_posts` is the disjoint union of the chain's posts,
/// - `pool` and `chain_posts` are disjoint,
/// - every pooled post carries a valid signature.
pub struct Ledger {
    chain: Vec<Block>,
    chain_posts: BTreeSet<Post>,
    pool: BTreeSet<Post>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Ledger {
            chain: Vec::new(),
            chain_posts: BTreeSet::new(),
            pool: BTreeSet::new(),
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn height(&self) -> usize {
        self.chain.len()
    }

    /// Hash the next block must link to.
    pub fn tip_hash(&self) -> BlockHash {
        match self.chain.last() {
            Some(block) => block.header.hash(),
            None => GENESIS_PREV_HASH,
        }
    }

    pub fn pool_is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn pool_snapshot(&self) -> Vec<Post> {
        self.pool.iter().cloned().collect()
    }

    /// The up-to-`limit` oldest pooled posts, the candidate contents
    /// of the next mined block.
    pub fn next_posts(&self, limit: usize) -> Vec<Post> {
        self.pool.iter().take(limit).cloned().collect()
    }

    /// Admit a user-authored post to the pool.
    pub fn write_post(&mut self, post: Post) -> Result<(), WriteError> {
        if !post.verify() {
            return Err(WriteError::InvalidSignature);
        }
        if self.chain_posts.contains(&post) {
            return Err(WriteError::DuplicateInChain);
        }
        if self.pool.contains(&post) {
            return Err(WriteError::DuplicateInPool);
        }
        self.pool.insert(post);
        Ok(())
    }

    /// Admit a batch of posts discovered from a peer. The whole batch
    /// is rejected if any post fails verification; duplicates are
    /// skipped without reordering what is already pooled.
    pub fn sync_posts(&mut self, posts: Vec<Post>) -> Result<(), SyncError> {
        if !posts.iter().all(Post::verify) {
            return Err(SyncError::InvalidPost);
        }
        for post in posts {
            if self.chain_posts.contains(&post) || self.pool.contains(&post) {
                continue;
            }
            self.pool.insert(post);
        }
        Ok(())
    }

    /// Consider a chain received via broadcast. A candidate replaces
    /// the local chain only when strictly longer and fully valid;
    /// everything else is ignored without telling the sender why.
    /// Returns whether the candidate was adopted.
    pub fn consider_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.chain.len() {
            return false;
        }
        let confirmed = match validate_chain(&candidate) {
            Some(posts) => posts,
            None => return false,
        };

        // Pooled posts the candidate confirms leave the pool.
        let mut pool: BTreeSet<Post> = self
            .pool
            .iter()
            .filter(|post| !confirmed.contains(post))
            .cloned()
            .collect();

        // Blocks past the common prefix are discarded; their posts
        // return to the pool unless the candidate confirms them.
        let shared = self
            .chain
            .iter()
            .zip(candidate.iter())
            .take_while(|(ours, theirs)| ours.header.hash() == theirs.header.hash())
            .count();
        for block in &self.chain[shared..] {
            for post in &block.posts {
                if !confirmed.contains(post) {
                    pool.insert(post.clone());
                }
            }
        }

        info!(
            "Adopting a broadcast chain of length {} over local length {} ({} discarded blocks)",
            candidate.len(),
            self.chain.len(),
            self.chain.len() - shared,
        );
        self.chain = candidate;
        self.chain_posts = confirmed;
        self.pool = pool;
        true
    }

    /// Commit a locally mined block. `snapshot_height` is the chain
    /// length observed when the candidate was staged; if the chain
    /// advanced during the nonce search the block no longer extends
    /// the tip and is dropped. Returns whether the block was appended.
    pub fn commit_mined(&mut self, snapshot_height: usize, block: Block) -> bool {
        if self.chain.len() != snapshot_height {
            return false;
        }
        for post in &block.posts {
            self.pool.remove(post);
            self.chain_posts.insert(post.clone());
        }
        self.chain.push(block);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{mine, now_nanos, Block, Post};
    use crate::crypto;

    fn signed_post(seed: u64, content: &str) -> Post {
        let keys = crypto::gen_keys_from_seed(seed);
        Post::new(&keys, content.to_string(), now_nanos())
    }

    fn mined_block(prev_hash: BlockHash, posts: Vec<Post>) -> Block {
        let mut block = Block::stage(prev_hash, posts, now_nanos());
        mine(&mut block);
        block
    }

    /// Extend `chain` by one mined block carrying `posts`.
    fn extend(chain: &mut Vec<Block>, posts: Vec<Post>) {
        let prev_hash = match chain.last() {
            Some(block) => block.header.hash(),
            None => GENESIS_PREV_HASH,
        };
        chain.push(mined_block(prev_hash, posts));
    }

    fn assert_invariants(ledger: &Ledger) {
        let confirmed = validate_chain(ledger.chain()).expect("chain must validate");
        assert_eq!(confirmed, ledger.chain_posts);
        assert!(ledger.pool.is_disjoint(&ledger.chain_posts));
        assert!(ledger.pool.iter().all(Post::verify));
    }

    #[test]
    fn write_rejects_duplicates_and_bad_signatures() {
        let mut ledger = Ledger::new();
        let post = signed_post(1, "hello");

        assert_eq!(ledger.write_post(post.clone()), Ok(()));
        assert_eq!(
            ledger.write_post(post.clone()),
            Err(WriteError::DuplicateInPool)
        );

        let mut forged = signed_post(2, "legit");
        forged.body.content = "forged".to_string();
        assert_eq!(
            ledger.write_post(forged),
            Err(WriteError::InvalidSignature)
        );
        assert_invariants(&ledger);
    }

    #[test]
    fn write_rejects_posts_already_confirmed() {
        let mut ledger = Ledger::new();
        let post = signed_post(1, "hello");
        let mut chain = Vec::new();
        extend(&mut chain, vec![post.clone()]);
        assert!(ledger.consider_chain(chain));

        assert_eq!(ledger.write_post(post), Err(WriteError::DuplicateInChain));
        assert_invariants(&ledger);
    }

    #[test]
    fn sync_rejects_whole_batch_on_any_invalid_post() {
        let mut ledger = Ledger::new();
        let good = signed_post(1, "good");
        let mut bad = signed_post(2, "good");
        bad.body.content = "tampered".to_string();

        assert_eq!(
            ledger.sync_posts(vec![good, bad]),
            Err(SyncError::InvalidPost)
        );
        assert!(ledger.pool_is_empty());
    }

    #[test]
    fn sync_is_idempotent_on_duplicates() {
        let mut ledger = Ledger::new();
        let first = signed_post(1, "one");
        let second = signed_post(2, "two");

        assert_eq!(ledger.sync_posts(vec![first.clone()]), Ok(()));
        assert_eq!(
            ledger.sync_posts(vec![first.clone(), second.clone()]),
            Ok(())
        );
        assert_eq!(ledger.pool_snapshot(), vec![first, second]);
        assert_invariants(&ledger);
    }

    #[test]
    fn broadcast_ignores_shorter_equal_and_invalid_chains() {
        let mut ledger = Ledger::new();
        let mut chain = Vec::new();
        extend(&mut chain, vec![signed_post(1, "one")]);
        extend(&mut chain, vec![signed_post(2, "two")]);
        assert!(ledger.consider_chain(chain.clone()));

        // same length is a no-op
        assert!(!ledger.consider_chain(chain.clone()));
        // shorter is a no-op
        assert!(!ledger.consider_chain(chain[..1].to_vec()));

        // longer but with a corrupted summary is a no-op
        let mut corrupted = chain.clone();
        extend(&mut corrupted, vec![signed_post(3, "three")]);
        corrupted[2].header.summary[0] ^= 1;
        assert!(!ledger.consider_chain(corrupted));

        // longer but with broken linkage is a no-op
        let mut unlinked = chain.clone();
        unlinked.push(mined_block(GENESIS_PREV_HASH, vec![signed_post(4, "x")]));
        assert!(!ledger.consider_chain(unlinked));

        assert_eq!(ledger.height(), 2);
        assert_invariants(&ledger);
    }

    #[test]
    fn broadcast_rejects_chains_with_duplicated_posts() {
        let mut ledger = Ledger::new();
        let post = signed_post(1, "echo");
        let mut chain = Vec::new();
        extend(&mut chain, vec![post.clone()]);
        extend(&mut chain, vec![post]);
        assert!(!ledger.consider_chain(chain));
        assert_eq!(ledger.height(), 0);
    }

    #[test]
    fn reorg_returns_discarded_posts_to_the_pool() {
        let orphaned = signed_post(10, "orphaned");
        let confirmed = signed_post(11, "confirmed");
        let winner_a = signed_post(12, "winner a");
        let winner_b = signed_post(13, "winner b");

        // shared prefix
        let mut prefix = Vec::new();
        extend(&mut prefix, vec![confirmed.clone()]);

        // our tail carries the post that will be orphaned
        let mut ours = prefix.clone();
        extend(&mut ours, vec![orphaned.clone()]);

        // the competing tail is longer and confirms different posts
        let mut theirs = prefix.clone();
        extend(&mut theirs, vec![winner_a.clone()]);
        extend(&mut theirs, vec![winner_b.clone()]);

        let mut ledger = Ledger::new();
        assert!(ledger.consider_chain(ours));
        // a pending post the winner confirms must leave the pool
        assert_eq!(ledger.write_post(winner_a.clone()), Ok(()));

        assert!(ledger.consider_chain(theirs));
        assert_eq!(ledger.height(), 3);
        // the orphaned post is pending again; nothing was lost
        assert_eq!(ledger.pool_snapshot(), vec![orphaned]);
        assert!(ledger.chain_posts.contains(&confirmed));
        assert!(ledger.chain_posts.contains(&winner_a));
        assert!(ledger.chain_posts.contains(&winner_b));
        assert_invariants(&ledger);
    }

    #[test]
    fn commit_drops_block_when_chain_advanced() {
        let mut ledger = Ledger::new();
        let post = signed_post(1, "mine me");
        assert_eq!(ledger.write_post(post.clone()), Ok(()));

        // stage a candidate at height 0
        let snapshot_height = ledger.height();
        let mut candidate = Block::stage(ledger.tip_hash(), vec![post], now_nanos());
        mine(&mut candidate);

        // a longer broadcast lands while the nonce search is running
        let mut other = Vec::new();
        extend(&mut other, vec![signed_post(2, "a")]);
        extend(&mut other, vec![signed_post(3, "b")]);
        assert!(ledger.consider_chain(other));

        assert!(!ledger.commit_mined(snapshot_height, candidate));
        assert_eq!(ledger.height(), 2);
        assert_invariants(&ledger);
    }

    #[test]
    fn commit_appends_and_moves_posts_out_of_the_pool() {
        let mut ledger = Ledger::new();
        let post = signed_post(1, "mine me");
        assert_eq!(ledger.write_post(post.clone()), Ok(()));

        let snapshot_height = ledger.height();
        let mut candidate = Block::stage(ledger.tip_hash(), vec![post.clone()], now_nanos());
        mine(&mut candidate);

        assert!(ledger.commit_mined(snapshot_height, candidate));
        assert_eq!(ledger.height(), 1);
        assert!(ledger.pool_is_empty());
        assert!(ledger.chain_posts.contains(&post));
        assert_invariants(&ledger);
    }
}
