use crate::network::messages::{PortsResponse, RegisterRequest};
use crate::{SHUTDOWN_DEADLINE, TRACKER_ENTRY_TIMEOUT};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Live miner entries keyed by port. An entry lives until its
/// deadline; heartbeats push the deadline out.
#[derive(Default)]
struct Directory {
    miners: HashMap<u16, Instant>,
}

impl Directory {
    /// Drop expired entries and list what is left.
    fn live_ports(&mut self, now: Instant) -> Vec<u16> {
        self.miners.retain(|_, deadline| *deadline > now);
        let mut ports: Vec<u16> = self.miners.keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

struct Runtime {
    drain_tx: oneshot::Sender<()>,
    server_handle: JoinHandle<()>,
}

struct Inner {
    port: u16,
    directory: StdMutex<Directory>,
    runtime: StdMutex<Option<Runtime>>,
}

/// The tracker: a directory miners heartbeat into and that users and
/// miners query for live peers. It holds no chain state.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    pub fn new(port: u16) -> Self {
        Tracker {
            inner: Arc::new(Inner {
                port,
                directory: StdMutex::new(Directory::default()),
                runtime: StdMutex::new(None),
            }),
        }
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub async fn start(&self) -> io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", self.inner.port)).await?;
        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let app = Router::new()
            .route("/register", post(register_handler))
            .route("/get_miners", get(get_miners_handler))
            .with_state(self.clone());
        let port = self.inner.port;
        let server_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                drain_rx.await.ok();
            });
            if let Err(e) = serve.await {
                error!("Tracker {} server failed: {}", port, e);
            }
        });
        self.inner.runtime.lock().unwrap().replace(Runtime {
            drain_tx,
            server_handle,
        });
        info!("Tracker {} is running", self.inner.port);
        Ok(())
    }

    pub async fn shutdown(&self) {
        let runtime = match self.inner.runtime.lock().unwrap().take() {
            Some(runtime) => runtime,
            None => {
                warn!("Tracker {} asked to shut down while idle", self.inner.port);
                return;
            }
        };
        let _ = runtime.drain_tx.send(());
        let mut server_handle = runtime.server_handle;
        if timeout(SHUTDOWN_DEADLINE, &mut server_handle).await.is_err() {
            warn!(
                "Tracker {} server did not drain in time, aborting it",
                self.inner.port
            );
            server_handle.abort();
        }
        info!("Tracker {} has shut down", self.inner.port);
    }
}

/// POST /register: refresh the caller's entry and return every live
/// port, the caller included.
async fn register_handler(
    State(tracker): State<Tracker>,
    Json(request): Json<RegisterRequest>,
) -> Json<PortsResponse> {
    let now = Instant::now();
    let mut directory = tracker.inner.directory.lock().unwrap();
    directory
        .miners
        .insert(request.port, now + TRACKER_ENTRY_TIMEOUT);
    Json(PortsResponse {
        ports: directory.live_ports(now),
    })
}

/// GET /get_miners: every live port, or 404 when none remain.
async fn get_miners_handler(State(tracker): State<Tracker>) -> Response {
    let ports = tracker
        .inner
        .directory
        .lock()
        .unwrap()
        .live_ports(Instant::now());
    if ports.is_empty() {
        StatusCode::NOT_FOUND.into_response()
    } else {
        Json(PortsResponse { ports }).into_response()
    }
}
