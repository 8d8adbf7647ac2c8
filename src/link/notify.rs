//! Change notifications for observable endpoint properties.
//!
//! Both endpoints post a [`PropertyChanged`] value to a bounded broadcast
//! channel whenever an observable property takes a new value. One post per
//! observed change; a write that leaves the value unchanged posts nothing.

use tokio::sync::broadcast;

/// Observable properties of the link endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    IpAddress,
    IsRunning,
    LastMessage,
    IsConnected,
    IsAttemptingConnection,
    LogLine,
}

impl Property {
    /// Property name as seen by subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            Property::IpAddress => "IPAddress",
            Property::IsRunning => "IsRunning",
            Property::LastMessage => "LastMessage",
            Property::IsConnected => "IsConnected",
            Property::IsAttemptingConnection => "IsAttemptingConnection",
            Property::LogLine => "LogLine",
        }
    }
}

/// Notification carrying the name of the property that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyChanged {
    pub property: Property,
}

impl PropertyChanged {
    pub fn new(property: Property) -> Self {
        Self { property }
    }
}

/// Broadcast sender for property changes, shared by an endpoint's internals.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    tx: broadcast::Sender<PropertyChanged>,
}

impl ChangeNotifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Post one notification. Lack of subscribers is not an error.
    pub(crate) fn notify(&self, property: Property) {
        let _ = self.tx.send(PropertyChanged::new(property));
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PropertyChanged> {
        self.tx.subscribe()
    }
}
