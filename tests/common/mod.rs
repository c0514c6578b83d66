#![allow(dead_code)]

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use postchain::block::{now_nanos, satisfies_target, Block, Post};
use postchain::crypto;
use postchain::network::messages::{ChainMessage, PortsResponse, PostMessage, RegisterRequest};
use postchain::{BlockHash, TRACKER_ENTRY_TIMEOUT};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Sign `content` with a fresh key, like a one-shot user would.
pub fn signed_post(content: &str) -> Post {
    let keys = crypto::gen_keys_random();
    Post::new(&keys, content.to_string(), now_nanos())
}

/// Search nonces until `block` satisfies the target.
pub fn mine(block: &mut Block) {
    let mut rng = rand::thread_rng();
    loop {
        block.header.nonce = rng.gen();
        if satisfies_target(&block.header.hash()) {
            return;
        }
    }
}

pub fn mined_block(prev_hash: BlockHash, posts: Vec<Post>) -> Block {
    let mut block = Block::stage(prev_hash, posts, now_nanos());
    mine(&mut block);
    block
}

/// POST a signed post to a miner's `/write`, returning the status.
pub async fn write_post(port: u16, post: &Post) -> reqwest::StatusCode {
    let message = PostMessage::from(post);
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/write", port))
        .json(&message)
        .send()
        .await
        .expect("miner must be reachable")
        .status()
}

/// Fetch and decode a miner's chain.
pub async fn read_chain(port: u16) -> Vec<Block> {
    let message: ChainMessage = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/read", port))
        .send()
        .await
        .expect("miner must be reachable")
        .json()
        .await
        .expect("read response must decode");
    message.into_chain().expect("chain must decode")
}

struct PartitionState {
    miners: Mutex<HashMap<u16, Instant>>,
    partitioned: AtomicBool,
}

/// A tracker that can split the network in two by port parity:
/// while partitioned, a registering miner only learns about peers
/// whose port has the same parity as its own.
#[derive(Clone)]
pub struct PartitionTracker {
    state: Arc<PartitionState>,
}

impl PartitionTracker {
    pub async fn start(port: u16) -> Self {
        let state = Arc::new(PartitionState {
            miners: Mutex::new(HashMap::new()),
            partitioned: AtomicBool::new(false),
        });
        let app = Router::new()
            .route("/register", post(partition_register))
            .route("/get_miners", get(partition_get_miners))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("tracker port must be free");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        PartitionTracker { state }
    }

    pub fn set_partitioned(&self, partitioned: bool) {
        self.state.partitioned.store(partitioned, Ordering::SeqCst);
    }
}

async fn partition_register(
    State(state): State<Arc<PartitionState>>,
    Json(request): Json<RegisterRequest>,
) -> Json<PortsResponse> {
    let now = Instant::now();
    let mut miners = state.miners.lock().unwrap();
    miners.insert(request.port, now + TRACKER_ENTRY_TIMEOUT);
    miners.retain(|_, deadline| *deadline > now);

    let partitioned = state.partitioned.load(Ordering::SeqCst);
    let mut ports: Vec<u16> = miners
        .keys()
        .copied()
        .filter(|port| !partitioned || port % 2 == request.port % 2)
        .collect();
    ports.sort_unstable();
    Json(PortsResponse { ports })
}

async fn partition_get_miners(
    State(state): State<Arc<PartitionState>>,
) -> Json<PortsResponse> {
    let now = Instant::now();
    let mut miners = state.miners.lock().unwrap();
    miners.retain(|_, deadline| *deadline > now);
    let mut ports: Vec<u16> = miners.keys().copied().collect();
    ports.sort_unstable();
    Json(PortsResponse { ports })
}

/// The deduplicated post contents of a fully validated chain, in
/// comparator order. Panics if the chain does not validate.
pub fn contents_of(chain: &[Block]) -> Vec<String> {
    postchain::ledger::validate_chain(chain)
        .expect("chain must validate")
        .into_iter()
        .map(|post| post.body.content)
        .collect()
}
