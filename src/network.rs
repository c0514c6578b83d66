pub mod messages;

use crate::block::{Block, Post};
use futures::future::join_all;
use log::{debug, warn};
use messages::{ChainMessage, PortsResponse, RegisterRequest, SyncRequest};
use std::time::Duration;

// Outbound calls must never wedge the background loop on a dead peer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Outbound half of the peer protocol: tracker registration and the
/// sync/broadcast fan-outs. Transport failures are logged and
/// swallowed; they never feed back into miner state.
pub struct PeerClient {
    http: reqwest::Client,
    port: u16,
    tracker_port: u16,
}

impl PeerClient {
    pub fn new(port: u16, tracker_port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        PeerClient {
            http,
            port,
            tracker_port,
        }
    }

    /// Heartbeat to the tracker. Returns the fresh peer snapshot with
    /// self removed, or `None` when the tracker could not be reached
    /// (the caller keeps its previous snapshot).
    pub async fn register(&self) -> Option<Vec<u16>> {
        let url = format!("http://127.0.0.1:{}/register", self.tracker_port);
        let request = RegisterRequest { port: self.port };
        let response = match self.http.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!("Failed to send register request to tracker: {}", error);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("Tracker refused registration: {}", response.status());
            return None;
        }
        match response.json::<PortsResponse>().await {
            Ok(body) => {
                let mut peers = body.ports;
                peers.retain(|&peer| peer != self.port);
                Some(peers)
            }
            Err(error) => {
                warn!("Failed to decode registration response: {}", error);
                None
            }
        }
    }

    /// Offer the pool snapshot to every peer in parallel.
    pub async fn sync_all(&self, peers: &[u16], posts: &[Post]) {
        let request = SyncRequest::from_posts(posts);
        join_all(peers.iter().map(|&peer| self.sync_with(peer, &request))).await;
    }

    async fn sync_with(&self, peer: u16, request: &SyncRequest) {
        let url = format!("http://127.0.0.1:{}/sync", peer);
        match self.http.post(&url).json(request).send().await {
            Ok(response) if !response.status().is_success() => {
                debug!("Peer {} rejected sync: {}", peer, response.status());
            }
            Ok(_) => {}
            Err(error) => {
                debug!("Error when syncing with peer {}: {}", peer, error);
            }
        }
    }

    /// Publish the full local chain to every peer in parallel.
    pub async fn broadcast_all(&self, peers: &[u16], chain: &[Block]) {
        let request = ChainMessage::from_chain(chain);
        join_all(
            peers
                .iter()
                .map(|&peer| self.broadcast_to(peer, &request)),
        )
        .await;
    }

    async fn broadcast_to(&self, peer: u16, request: &ChainMessage) {
        let url = format!("http://127.0.0.1:{}/broadcast", peer);
        match self.http.post(&url).json(request).send().await {
            Ok(response) if !response.status().is_success() => {
                debug!("Peer {} rejected broadcast: {}", peer, response.status());
            }
            Ok(_) => {}
            Err(error) => {
                debug!("Error when broadcasting to peer {}: {}", peer, error);
            }
        }
    }
}
