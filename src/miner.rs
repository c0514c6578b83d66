use crate::block::Post;
use crate::ledger::{Ledger, SyncError, WriteError};
use crate::manager;
use crate::network::messages::{
    ChainMessage, DecodeError, ErrorResponse, PostMessage, SyncRequest,
};
use crate::network::PeerClient;
use crate::SHUTDOWN_DEADLINE;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use std::convert::TryFrom;
use std::fmt::{self, Display};
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Where the node is in its life.
#[derive(Clone, Copy, PartialEq, Debug)]
enum Lifecycle {
    Idle,
    Running,
    Draining,
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Lifecycle::Idle => write!(f, "Idle"),
            Lifecycle::Running => write!(f, "Running"),
            Lifecycle::Draining => write!(f, "Draining"),
        }
    }
}

/// Live resources of a started node, surrendered on shutdown.
struct Runtime {
    quit_tx: mpsc::Sender<()>,
    loop_handle: JoinHandle<()>,
    drain_tx: oneshot::Sender<()>,
    server_handle: JoinHandle<()>,
}

pub(crate) struct Inner {
    pub(crate) port: u16,
    pub(crate) ledger: RwLock<Ledger>,
    pub(crate) peers: RwLock<Vec<u16>>,
    pub(crate) client: PeerClient,
    lifecycle: StdMutex<Lifecycle>,
    runtime: StdMutex<Option<Runtime>>,
}

/// A miner node: the chain/pool state machine behind one
/// readers/writer lock, the HTTP surface that mutates it, and the
/// background loop that heartbeats, syncs and mines.
#[derive(Clone)]
pub struct Miner {
    pub(crate) inner: Arc<Inner>,
}

impl Miner {
    pub fn new(port: u16, tracker_port: u16) -> Self {
        Miner {
            inner: Arc::new(Inner {
                port,
                ledger: RwLock::new(Ledger::new()),
                peers: RwLock::new(Vec::new()),
                client: PeerClient::new(port, tracker_port),
                lifecycle: StdMutex::new(Lifecycle::Idle),
                runtime: StdMutex::new(None),
            }),
        }
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Bind the listener, spawn the server and the background loop.
    pub async fn start(&self) -> io::Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Idle {
                warn!(
                    "Miner {} asked to start while {}",
                    self.inner.port, *lifecycle
                );
                return Ok(());
            }
            *lifecycle = Lifecycle::Running;
        }

        let listener = match TcpListener::bind(("127.0.0.1", self.inner.port)).await {
            Ok(listener) => listener,
            Err(error) => {
                *self.inner.lifecycle.lock().unwrap() = Lifecycle::Idle;
                return Err(error);
            }
        };
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let app = router(self.clone());
        let port = self.inner.port;
        let server_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                drain_rx.await.ok();
            });
            if let Err(e) = serve.await {
                error!("Miner {} server failed: {}", port, e);
            }
        });

        let (quit_tx, quit_rx) = mpsc::channel::<()>(1);
        let loop_handle = tokio::spawn(manager::run(self.clone(), quit_rx));

        self.inner.runtime.lock().unwrap().replace(Runtime {
            quit_tx,
            loop_handle,
            drain_tx,
            server_handle,
        });
        info!("Miner {} is running", self.inner.port);
        Ok(())
    }

    /// Stop the background loop, then drain in-flight handlers within
    /// a bounded deadline.
    pub async fn shutdown(&self) {
        let runtime = {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Running {
                warn!(
                    "Miner {} asked to shut down while {}",
                    self.inner.port, *lifecycle
                );
                return;
            }
            *lifecycle = Lifecycle::Draining;
            self.inner.runtime.lock().unwrap().take()
        };
        let Runtime {
            quit_tx,
            mut loop_handle,
            drain_tx,
            mut server_handle,
        } = runtime.expect("Running miner must have a runtime");

        // the loop acknowledges quit by finishing its task
        let _ = quit_tx.send(()).await;
        if timeout(SHUTDOWN_DEADLINE, &mut loop_handle).await.is_err() {
            warn!(
                "Miner {} background loop ignored quit, aborting it",
                self.inner.port
            );
            loop_handle.abort();
        }

        let _ = drain_tx.send(());
        if timeout(SHUTDOWN_DEADLINE, &mut server_handle).await.is_err() {
            warn!(
                "Miner {} server did not drain in time, aborting it",
                self.inner.port
            );
            server_handle.abort();
        }

        *self.inner.lifecycle.lock().unwrap() = Lifecycle::Idle;
        info!("Miner {} has shut down", self.inner.port);
    }
}

fn router(miner: Miner) -> Router {
    Router::new()
        .route("/read", get(read_handler))
        .route("/write", post(write_handler))
        .route("/sync", post(sync_handler))
        .route("/broadcast", post(broadcast_handler))
        .with_state(miner)
}

/// Client-visible admission failures. Everything maps to a 400 with
/// an `{ "error": … }` body.
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

/// GET /read: snapshot the chain in wire form. Never mutates.
async fn read_handler(State(miner): State<Miner>) -> Json<ChainMessage> {
    let ledger = miner.inner.ledger.read().await;
    Json(ChainMessage::from_chain(ledger.chain()))
}

/// POST /write: admit one user-authored post to the pool.
async fn write_handler(
    State(miner): State<Miner>,
    Json(message): Json<PostMessage>,
) -> Result<StatusCode, ApiError> {
    let post = Post::try_from(message)?;
    miner.inner.ledger.write().await.write_post(post)?;
    Ok(StatusCode::OK)
}

/// POST /sync: admit a batch of peer posts, all-or-nothing on
/// signature validity.
async fn sync_handler(
    State(miner): State<Miner>,
    Json(request): Json<SyncRequest>,
) -> Result<StatusCode, ApiError> {
    let posts = request.into_posts()?;
    miner.inner.ledger.write().await.sync_posts(posts)?;
    Ok(StatusCode::OK)
}

/// POST /broadcast: consider a candidate chain. Always 200 for a
/// well-formed body; whether the candidate convinced us is not
/// revealed to the sender.
async fn broadcast_handler(
    State(miner): State<Miner>,
    Json(request): Json<ChainMessage>,
) -> Result<StatusCode, ApiError> {
    let chain = request.into_chain()?;
    miner.inner.ledger.write().await.consider_chain(chain);
    Ok(StatusCode::OK)
}
