//! Robot facade - a server endpoint paired with a message handler.
//!
//! [`ConnectedRobot`] composes one [`RobotServer`] and turns its
//! `LastMessage` change notifications into handler invocations, exactly one
//! per received message. The handler is supplied at construction; robots
//! that never reply use [`NoopHandler`].

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;
use crate::link::notify::Property;
use crate::link::server::{RobotServer, ServerConfig};

/// Handler invoked once per received message.
///
/// Implementations snapshot `server.last_message()`, decode it into the
/// message type they expect, and may answer through
/// `server.send_message(..)`.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, server: &RobotServer) -> impl std::future::Future<Output = ()> + Send;
}

/// Handler that ignores every message.
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn on_message(&self, _server: &RobotServer) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
}

/// Robot with an embedded server endpoint.
pub struct ConnectedRobot<H: MessageHandler = NoopHandler> {
    server: Arc<RobotServer>,
    handler: Arc<H>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectedRobot<NoopHandler> {
    /// Create a robot that does not react to messages.
    pub fn new() -> Self {
        Self::with_handler(ServerConfig::default(), NoopHandler)
    }

    /// Create a non-reacting robot with the server at a specific address.
    pub fn with_address(address: Ipv4Addr) -> Self {
        Self::with_handler(ServerConfig::default().with_address(address), NoopHandler)
    }
}

impl Default for ConnectedRobot<NoopHandler> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: MessageHandler + 'static> ConnectedRobot<H> {
    /// Create a robot with a custom server config and handler.
    pub fn with_handler(config: ServerConfig, handler: H) -> Self {
        Self {
            server: Arc::new(RobotServer::with_config(config)),
            handler: Arc::new(handler),
            drain_task: Mutex::new(None),
        }
    }

    /// The embedded server endpoint.
    pub fn server(&self) -> &RobotServer {
        &self.server
    }

    /// Address of the embedded server.
    pub fn address(&self) -> Ipv4Addr {
        self.server.address()
    }

    /// Change the embedded server's address before starting it.
    pub fn set_address(&self, address: Ipv4Addr) {
        self.server.set_address(address);
    }

    /// True while the embedded server is listening.
    pub fn is_server_running(&self) -> bool {
        self.server.is_running()
    }

    /// Start the embedded server and the notification drain.
    pub async fn start(&self) -> Result<()> {
        // Subscribe before the accept loop exists so no message is missed.
        let mut rx = self.server.subscribe();
        self.server.start().await?;

        let server = Arc::clone(&self.server);
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) if change.property == Property::LastMessage => {
                        debug!("processing received message");
                        handler.on_message(server.as_ref()).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "notification drain lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.drain_task.lock().await = Some(task);

        Ok(())
    }

    /// Stop the embedded server and the notification drain.
    pub async fn stop(&self) {
        self.server.stop().await;
        if let Some(task) = self.drain_task.lock().await.take() {
            task.abort();
        }
    }
}
