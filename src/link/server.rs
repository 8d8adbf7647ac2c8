//! Server endpoint hosted by the robot.
//!
//! Provides:
//! - A TCP listener bound to the fixed control port
//! - An accept/receive loop running on its own tokio task
//! - The latest received message and the most recent caller session
//! - Change notifications when observable properties update

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::link::codec::{self, FrameCodec};
use crate::link::messages::Message;
use crate::link::notify::{ChangeNotifier, Property, PropertyChanged};
use crate::link::{CONTROL_PORT, read_lock, write_lock};

/// Configuration for the server endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind; the port is always [`CONTROL_PORT`].
    pub address: Ipv4Addr,
    /// Maximum accepted frame length in bytes.
    pub max_frame_length: usize,
    /// Channel capacity for change notifications.
    pub notify_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            max_frame_length: 16 * 1024 * 1024,
            notify_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Create config with a custom bind address.
    pub fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.address = address;
        self
    }

    /// Set the maximum frame length.
    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }
}

/// State shared between the endpoint handle and its accept loop.
struct Shared {
    address: RwLock<Ipv4Addr>,
    running: AtomicBool,
    last_message: RwLock<Option<String>>,
    /// Write half of the most recently accepted session.
    last_caller: Mutex<Option<OwnedWriteHalf>>,
    notifier: ChangeNotifier,
}

impl Shared {
    fn set_running(&self, value: bool) {
        if self.running.swap(value, Ordering::SeqCst) != value {
            self.notifier.notify(Property::IsRunning);
        }
    }

    /// Store a received frame, notifying once per observed change.
    fn publish_last_message(&self, content: &str) {
        let changed = {
            let mut guard = write_lock(&self.last_message);
            if guard.as_deref() == Some(content) {
                false
            } else {
                *guard = Some(content.to_string());
                true
            }
        };
        if changed {
            self.notifier.notify(Property::LastMessage);
        }
    }
}

/// Single-connection TCP server endpoint.
///
/// One listening socket at a time; `start` spawns the accept loop and `stop`
/// tears it down. The endpoint keeps only the latest received message and
/// the latest caller session, so `send` always answers the most recent peer.
pub struct RobotServer {
    shared: Arc<Shared>,
    max_frame_length: usize,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl RobotServer {
    /// Create a server with the default config (loopback address).
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server bound to a specific address.
    pub fn with_address(address: Ipv4Addr) -> Self {
        Self::with_config(ServerConfig::default().with_address(address))
    }

    /// Create a server with custom config.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: RwLock::new(config.address),
                running: AtomicBool::new(false),
                last_message: RwLock::new(None),
                last_caller: Mutex::new(None),
                notifier: ChangeNotifier::new(config.notify_capacity),
            }),
            max_frame_length: config.max_frame_length,
            shutdown_tx: Mutex::new(None),
            loop_task: Mutex::new(None),
        }
    }

    /// Address the next `start` will bind to.
    pub fn address(&self) -> Ipv4Addr {
        *read_lock(&self.shared.address)
    }

    /// Change the bind address. Has no effect on an already-bound socket.
    pub fn set_address(&self, address: Ipv4Addr) {
        let changed = {
            let mut guard = write_lock(&self.shared.address);
            if *guard == address {
                false
            } else {
                *guard = address;
                true
            }
        };
        if changed {
            self.shared.notifier.notify(Property::IpAddress);
        }
    }

    /// True while the accept loop is live.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the latest received message text.
    pub fn last_message(&self) -> Option<String> {
        read_lock(&self.shared.last_message).clone()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChanged> {
        self.shared.notifier.subscribe()
    }

    /// Bind, listen, and spawn the accept loop. Does not block on traffic.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(LinkError::AlreadyRunning);
        }

        let address = self.address();
        let listener = TcpListener::bind((address, CONTROL_PORT)).await?;
        info!(%address, port = CONTROL_PORT, "server listening");
        self.shared.set_running(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let shared = Arc::clone(&self.shared);
        let max_frame_length = self.max_frame_length;
        let task = tokio::spawn(async move {
            accept_loop(listener, shared, shutdown_rx, max_frame_length).await;
        });
        *self.loop_task.lock().await = Some(task);

        Ok(())
    }

    /// Signal the accept loop to exit and wait until it has.
    ///
    /// Idempotent: stopping a server that is not running is a no-op.
    pub async fn stop(&self) {
        let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() else {
            return;
        };
        let _ = shutdown_tx.send(true);

        if let Some(task) = self.loop_task.lock().await.take() {
            let _ = task.await;
        }
    }

    /// Write raw data to the most recently accepted session.
    pub async fn send(&self, data: &str) -> Result<()> {
        let mut guard = self.shared.last_caller.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(LinkError::NoActiveSession);
        };

        let written = async {
            writer.write_all(data.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if written.is_err() {
            // The peer is gone; drop the dead session handle.
            *guard = None;
            return Err(LinkError::ConnectionClosed);
        }
        Ok(())
    }

    /// Encode a message and send it to the most recent caller.
    pub async fn send_message<M: Message>(&self, message: &M) -> Result<()> {
        self.send(&codec::encode(message)?).await
    }
}

impl Default for RobotServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept callers and read from the newest session until told to stop.
///
/// Acceptance stays pending while a session is live, so a new caller
/// supersedes an idle or stalled one immediately: its write half becomes
/// the last caller and its frames become the ones being read.
async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_frame_length: usize,
) {
    let mut frames: Option<FramedRead<OwnedReadHalf, FrameCodec>> = None;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let (read_half, write_half) = stream.into_split();
                        // The new session supersedes any previous caller.
                        *shared.last_caller.lock().await = Some(write_half);
                        frames = Some(FramedRead::new(
                            read_half,
                            FrameCodec::with_max_length(max_frame_length),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            frame = next_frame(&mut frames) => {
                match frame {
                    Some(Ok(text)) => {
                        debug!(bytes = text.len(), "frame received");
                        shared.publish_last_message(&text);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "receive failed");
                        frames = None;
                    }
                    None => {
                        debug!("peer disconnected");
                        frames = None;
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
    shared.set_running(false);
    info!("server stopped");
}

/// Next frame from the active session; pending forever while there is none.
async fn next_frame(
    frames: &mut Option<FramedRead<OwnedReadHalf, FrameCodec>>,
) -> Option<std::io::Result<String>> {
    match frames {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
