use crate::block::{now_nanos, Block, Post};
use crate::crypto;
use crate::ledger::validate_chain;
use crate::network::messages::{ChainMessage, PortsResponse, PostMessage};
use crate::PublicKeyBytes;
use ed25519_dalek::Keypair;
use futures::future::join_all;
use log::debug;
use rand::seq::SliceRandom;
use std::time::Duration;
use thiserror::Error;

/// Number of miners a user fans a write or read out to.
pub const RW_COUNT: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum UserError {
    #[error("failed to retrieve miners from the tracker")]
    TrackerUnavailable,
    #[error("failed to receive a valid blockchain")]
    NoValidChain,
}

/// A thin client owning a long-lived key pair. Writes are fanned out
/// to a random subset of miners; reads prefer the longest chain that
/// fully validates.
pub struct User {
    keys: Keypair,
    tracker_port: u16,
    http: reqwest::Client,
}

impl User {
    pub fn new(tracker_port: u16) -> Self {
        Self::with_keys(crypto::gen_keys_random(), tracker_port)
    }

    pub fn with_keys(keys: Keypair, tracker_port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        User {
            keys,
            tracker_port,
            http,
        }
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.keys.public.to_bytes()
    }

    /// A random subset of up to `RW_COUNT` live miners.
    async fn random_miners(&self) -> Result<Vec<u16>, UserError> {
        let url = format!("http://127.0.0.1:{}/get_miners", self.tracker_port);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|_| UserError::TrackerUnavailable)?;
        if !response.status().is_success() {
            return Err(UserError::TrackerUnavailable);
        }
        let body: PortsResponse = response
            .json()
            .await
            .map_err(|_| UserError::TrackerUnavailable)?;

        let mut ports = body.ports;
        ports.shuffle(&mut rand::thread_rng());
        ports.truncate(RW_COUNT);
        Ok(ports)
    }

    /// Sign `content` against the current time and offer it to a
    /// random subset of miners. Per-miner rejections are logged and
    /// ignored; one accepting miner is enough.
    pub async fn write_post(&self, content: &str) -> Result<(), UserError> {
        let post = Post::new(&self.keys, content.to_string(), now_nanos());
        let message = PostMessage::from(&post);
        let miners = self.random_miners().await?;

        join_all(miners.into_iter().map(|port| {
            let message = &message;
            async move {
                let url = format!("http://127.0.0.1:{}/write", port);
                match self.http.post(&url).json(message).send().await {
                    Ok(response) if !response.status().is_success() => {
                        debug!("Miner {} rejected the post: {}", port, response.status());
                    }
                    Ok(_) => {}
                    Err(error) => debug!("Error when writing to miner {}: {}", port, error),
                }
            }
        }))
        .await;
        Ok(())
    }

    /// Read the agreed history: fetch chains from a random subset of
    /// miners, prefer the longest one that validates, and surface its
    /// deduplicated posts in comparator order.
    pub async fn read_posts(&self) -> Result<Vec<Post>, UserError> {
        let miners = self.random_miners().await?;
        let mut chains: Vec<Vec<Block>> =
            join_all(miners.into_iter().map(|port| self.fetch_chain(port)))
                .await
                .into_iter()
                .flatten()
                .collect();
        chains.sort_by(|a, b| b.len().cmp(&a.len()));

        for chain in chains {
            if chain.is_empty() {
                continue;
            }
            if let Some(posts) = validate_chain(&chain) {
                return Ok(posts.into_iter().collect());
            }
        }
        Err(UserError::NoValidChain)
    }

    async fn fetch_chain(&self, port: u16) -> Option<Vec<Block>> {
        let url = format!("http://127.0.0.1:{}/read", port);
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let message: ChainMessage = response.json().await.ok()?;
        message.into_chain().ok()
    }
}
