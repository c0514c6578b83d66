use crate::block::{now_nanos, satisfies_target, Block};
use crate::miner::Miner;
use crate::{
    HEARTBEAT_MAX_MS, HEARTBEAT_MIN_MS, MINING_ITERATIONS, POSTS_PER_BLOCK, SYNC_MAX_MS,
    SYNC_MIN_MS,
};
use log::{debug, info};
use rand::Rng;
use std::future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// How long the loop parks when the pool has nothing worth mining.
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// The miner's background loop: heartbeat to the tracker, offer the
/// pool to peers, and otherwise attempt to mine. Incoming work always
/// preempts the next mining attempt, never the current one; the
/// per-attempt nonce cap is what keeps preemption prompt.
pub(crate) async fn run(miner: Miner, mut quit_rx: mpsc::Receiver<()>) {
    let (heartbeat_every, sync_every) = {
        let mut rng = rand::thread_rng();
        (
            Duration::from_millis(rng.gen_range(HEARTBEAT_MIN_MS, HEARTBEAT_MAX_MS)),
            Duration::from_millis(rng.gen_range(SYNC_MIN_MS, SYNC_MAX_MS)),
        )
    };

    // register with the tracker immediately
    heartbeat(&miner).await;

    let mut heartbeat_timer = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sync_timer = interval_at(Instant::now() + sync_every, sync_every);
    sync_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Miner {} background loop is running", miner.port());

    loop {
        // Quit and the timers sit above the always-ready mining arm,
        // so pending events drain before the next attempt.
        tokio::select! {
            biased;
            _ = quit_rx.recv() => break,
            _ = heartbeat_timer.tick() => heartbeat(&miner).await,
            _ = sync_timer.tick() => sync_pool(&miner).await,
            _ = future::ready(()) => mine_once(&miner).await,
        }
    }

    info!("Miner {} background loop has quit", miner.port());
}

/// Re-register with the tracker and replace the peer snapshot. An
/// unreachable tracker keeps the previous snapshot.
async fn heartbeat(miner: &Miner) {
    if let Some(peers) = miner.inner.client.register().await {
        *miner.inner.peers.write().await = peers;
    }
}

/// Offer every pooled post to every peer.
async fn sync_pool(miner: &Miner) {
    let posts = miner.inner.ledger.read().await.pool_snapshot();
    if posts.is_empty() {
        // no need to sync empty pools
        return;
    }
    let peers = miner.inner.peers.read().await.clone();
    miner.inner.client.sync_all(&peers, &posts).await;
}

/// One bounded mining attempt: stage a candidate from the oldest
/// pooled posts, search nonces on the snapshot with no lock held,
/// and commit only if the chain has not advanced meanwhile.
async fn mine_once(miner: &Miner) {
    let staged = {
        let ledger = miner.inner.ledger.read().await;
        if ledger.pool_is_empty() {
            None
        } else {
            let posts = ledger.next_posts(POSTS_PER_BLOCK);
            Some((
                ledger.height(),
                Block::stage(ledger.tip_hash(), posts, now_nanos()),
            ))
        }
    };
    let (snapshot_height, mut candidate) = match staged {
        Some(staged) => staged,
        None => {
            // park briefly instead of spinning on an empty pool
            tokio::time::sleep(IDLE_WAIT).await;
            return;
        }
    };

    let mined = {
        let mut rng = rand::thread_rng();
        let mut mined = false;
        for _ in 0..MINING_ITERATIONS {
            candidate.header.nonce = rng.gen();
            if satisfies_target(&candidate.header.hash()) {
                mined = true;
                break;
            }
        }
        mined
    };
    if !mined {
        return;
    }

    let chain = {
        let mut ledger = miner.inner.ledger.write().await;
        if !ledger.commit_mined(snapshot_height, candidate) {
            // a broadcast overtook us during the search
            debug!(
                "Miner {} mined a stale block, dropping it",
                miner.port()
            );
            return;
        }
        info!(
            "Miner {} mined a block, chain length is now {}",
            miner.port(),
            ledger.height()
        );
        ledger.chain().to_vec()
    };

    let peers = miner.inner.peers.read().await.clone();
    miner.inner.client.broadcast_all(&peers, &chain).await;
}
