//! Client connector used by the controller process.
//!
//! Opens the outbound TCP connection to a robot's server endpoint and
//! exchanges one message at a time. Ordinary connection failures (refused,
//! unreachable) are not errors; they leave the client disconnected and a
//! human-readable log line behind.

use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::link::codec;
use crate::link::messages::Message;
use crate::link::notify::{ChangeNotifier, Property, PropertyChanged};
use crate::link::{CONTROL_PORT, read_lock, write_lock};

/// Configuration for the client connector.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Robot address to connect to; the port is always [`CONTROL_PORT`].
    pub address: Ipv4Addr,
    /// Fixed receive buffer size in bytes.
    pub recv_buffer_size: usize,
    /// Channel capacity for change notifications.
    pub notify_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            recv_buffer_size: 4096,
            notify_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Create config with a custom robot address.
    pub fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.address = address;
        self
    }

    /// Set the receive buffer size.
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }
}

/// Outbound connector to a robot's server endpoint.
pub struct RobotClient {
    address: RwLock<Ipv4Addr>,
    recv_buffer_size: usize,
    stream: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    attempting: AtomicBool,
    log_line: RwLock<String>,
    notifier: ChangeNotifier,
}

impl RobotClient {
    /// Create a client targeting a specific robot address.
    pub fn new(address: Ipv4Addr) -> Self {
        Self::with_config(ClientConfig::default().with_address(address))
    }

    /// Create a client from a textual address.
    ///
    /// Fails fast with `InvalidArgument` when the address is empty or not a
    /// valid IPv4 address.
    pub fn from_addr(address: &str) -> Result<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(LinkError::InvalidArgument(
                "robot address cannot be empty".to_string(),
            ));
        }
        let parsed: Ipv4Addr = trimmed.parse().map_err(|_| {
            LinkError::InvalidArgument(format!("not a valid IPv4 address: {}", trimmed))
        })?;
        Ok(Self::new(parsed))
    }

    /// Create a client with custom config.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            address: RwLock::new(config.address),
            recv_buffer_size: config.recv_buffer_size,
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            attempting: AtomicBool::new(false),
            log_line: RwLock::new(String::new()),
            notifier: ChangeNotifier::new(config.notify_capacity),
        }
    }

    /// Target robot address.
    pub fn address(&self) -> Ipv4Addr {
        *read_lock(&self.address)
    }

    /// Change the target address; takes effect on the next `connect`.
    pub fn set_address(&self, address: Ipv4Addr) {
        let changed = {
            let mut guard = write_lock(&self.address);
            if *guard == address {
                false
            } else {
                *guard = address;
                true
            }
        };
        if changed {
            self.notifier.notify(Property::IpAddress);
        }
    }

    /// True if the last connection attempt succeeded and no disconnect or
    /// failed transfer has happened since.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True while a connection attempt is in flight.
    pub fn is_attempting_connection(&self) -> bool {
        self.attempting.load(Ordering::SeqCst)
    }

    /// Latest human-readable connection log line.
    pub fn log_line(&self) -> String {
        read_lock(&self.log_line).clone()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChanged> {
        self.notifier.subscribe()
    }

    /// Open the connection to `(address, 11000)`.
    ///
    /// Ordinary failures do not error: the client stays disconnected and
    /// records the failure in `log_line`.
    pub async fn connect(&self) {
        let address = self.address();
        self.set_attempting(true);
        self.set_log_line(format!(
            "Attempting connection to robot at {}:{}",
            address, CONTROL_PORT
        ));

        match TcpStream::connect((address, CONTROL_PORT)).await {
            Ok(stream) => {
                debug!(%address, "connected to robot");
                *self.stream.lock().await = Some(stream);
                self.set_connected(true);
            }
            Err(e) => {
                warn!(%address, error = %e, "connection failed");
                self.set_log_line(format!("Connection failed: {}", e));
                self.set_connected(false);
            }
        }
        self.set_attempting(false);
    }

    /// Mark the client disconnected; the socket close is best-effort.
    pub async fn disconnect(&self) {
        self.set_connected(false);
        *self.stream.lock().await = None;
    }

    /// Encode and write one message.
    pub async fn send<M: Message>(&self, message: &M) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let encoded = codec::encode(message)?;

        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let written = async {
            stream.write_all(encoded.as_bytes()).await?;
            stream.flush().await
        }
        .await;

        if written.is_err() {
            *guard = None;
            drop(guard);
            self.set_connected(false);
            return Err(LinkError::ConnectionClosed);
        }
        Ok(())
    }

    /// Wait for at least one segment and decode it as `M`.
    ///
    /// Reads into a fixed buffer; a reply larger than the buffer is
    /// truncated (known limitation of the protocol).
    pub async fn receive<M: Message>(&self) -> Result<M> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let mut buffer = vec![0u8; self.recv_buffer_size];
        let read = stream.read(&mut buffer).await;
        let received = match read {
            Ok(0) | Err(_) => {
                *guard = None;
                drop(guard);
                self.set_connected(false);
                return Err(LinkError::ConnectionClosed);
            }
            Ok(n) => n,
        };

        let text = String::from_utf8_lossy(&buffer[..received]);
        codec::decode(&text)
    }

    fn set_connected(&self, value: bool) {
        if self.connected.swap(value, Ordering::SeqCst) != value {
            self.notifier.notify(Property::IsConnected);
        }
    }

    fn set_attempting(&self, value: bool) {
        if self.attempting.swap(value, Ordering::SeqCst) != value {
            self.notifier.notify(Property::IsAttemptingConnection);
        }
    }

    fn set_log_line(&self, line: String) {
        let changed = {
            let mut guard = write_lock(&self.log_line);
            if *guard == line {
                false
            } else {
                *guard = line;
                true
            }
        };
        if changed {
            self.notifier.notify(Property::LogLine);
        }
    }
}

impl Default for RobotClient {
    fn default() -> Self {
        Self::with_config(ClientConfig::default())
    }
}
