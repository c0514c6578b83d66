use crate::block::{Block, BlockHeader, Post, PostBody};
use crate::BlockHash;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::convert::{TryFrom, TryInto};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 string")]
    Base64(#[from] base64::DecodeError),
    #[error("binary field has the wrong length")]
    Length,
    #[error("post count does not match the post list")]
    PostCount,
}

fn decode_hash(encoded: &str) -> Result<BlockHash, DecodeError> {
    BASE64
        .decode(encoded)?
        .try_into()
        .map_err(|_| DecodeError::Length)
}

/// Wire form of a post: binary fields as standard base64.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct PostMessage {
    pub user: String,
    pub content: String,
    pub timestamp: i64,
    pub signature: String,
}

impl From<&Post> for PostMessage {
    fn from(post: &Post) -> Self {
        PostMessage {
            user: BASE64.encode(post.user),
            content: post.body.content.clone(),
            timestamp: post.body.timestamp,
            signature: BASE64.encode(&post.signature),
        }
    }
}

impl TryFrom<PostMessage> for Post {
    type Error = DecodeError;

    fn try_from(message: PostMessage) -> Result<Self, Self::Error> {
        Ok(Post {
            user: BASE64
                .decode(&message.user)?
                .try_into()
                .map_err(|_| DecodeError::Length)?,
            body: PostBody {
                content: message.content,
                timestamp: message.timestamp,
            },
            // signature length is checked by verification, not decoding
            signature: BASE64.decode(&message.signature)?,
        })
    }
}

/// Wire form of a block. `n-posts` is redundant framing and must match
/// the post list.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct BlockMessage {
    #[serde(rename = "prev-hash")]
    pub prev_hash: String,
    pub summary: String,
    pub timestamp: i64,
    #[serde(rename = "n-posts")]
    pub n_posts: usize,
    pub nonce: u32,
    pub posts: Vec<PostMessage>,
}

impl From<&Block> for BlockMessage {
    fn from(block: &Block) -> Self {
        BlockMessage {
            prev_hash: BASE64.encode(block.header.prev_hash),
            summary: BASE64.encode(block.header.summary),
            timestamp: block.header.timestamp,
            n_posts: block.posts.len(),
            nonce: block.header.nonce,
            posts: block.posts.iter().map(PostMessage::from).collect(),
        }
    }
}

impl TryFrom<BlockMessage> for Block {
    type Error = DecodeError;

    fn try_from(message: BlockMessage) -> Result<Self, Self::Error> {
        if message.n_posts != message.posts.len() {
            return Err(DecodeError::PostCount);
        }
        Ok(Block {
            header: BlockHeader {
                prev_hash: decode_hash(&message.prev_hash)?,
                summary: decode_hash(&message.summary)?,
                timestamp: message.timestamp,
                nonce: message.nonce,
            },
            posts: message
                .posts
                .into_iter()
                .map(Post::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Body of `POST /sync`.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct SyncRequest {
    pub posts: Vec<PostMessage>,
}

impl SyncRequest {
    pub fn from_posts(posts: &[Post]) -> Self {
        SyncRequest {
            posts: posts.iter().map(PostMessage::from).collect(),
        }
    }

    pub fn into_posts(self) -> Result<Vec<Post>, DecodeError> {
        self.posts.into_iter().map(Post::try_from).collect()
    }
}

/// Body of `POST /broadcast` and of the `GET /read` response.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ChainMessage {
    pub blockchain: Vec<BlockMessage>,
}

impl ChainMessage {
    pub fn from_chain(chain: &[Block]) -> Self {
        ChainMessage {
            blockchain: chain.iter().map(BlockMessage::from).collect(),
        }
    }

    pub fn into_chain(self) -> Result<Vec<Block>, DecodeError> {
        self.blockchain.into_iter().map(Block::try_from).collect()
    }
}

/// Body of `POST /register` on the tracker.
#[derive(Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub port: u16,
}

/// Tracker response listing live miner ports.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct PortsResponse {
    pub ports: Vec<u16>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
