//! Message types exchanged between the controller and the robot.
//!
//! The protocol carries a closed set of message types. Every type implements
//! [`Message`] with a unique `KIND` tag that the codec embeds in the wire
//! envelope, and every type carries the [`Sender`] field of the base shape.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Originator of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    /// Sent by the controller client.
    FromClient,
    /// Sent by the robot.
    FromRobot,
    /// Not set yet.
    #[default]
    Undefined,
}

/// A typed message that can travel over the control link.
///
/// Implementors form a closed, explicitly registered set: the codec never
/// discovers types at runtime, it matches the envelope tag against the
/// `KIND` of the type the caller asked for.
pub trait Message: Serialize + DeserializeOwned {
    /// Wire tag identifying this message type in the envelope.
    const KIND: &'static str;
}

/// Base message shape: just the sender.
///
/// Richer message types add their own fields next to `sender` and register
/// themselves with their own `KIND`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotMessage {
    pub sender: Sender,
}

impl RobotMessage {
    pub fn new(sender: Sender) -> Self {
        Self { sender }
    }

    pub fn from_client() -> Self {
        Self::new(Sender::FromClient)
    }

    pub fn from_robot() -> Self {
        Self::new(Sender::FromRobot)
    }
}

impl Message for RobotMessage {
    const KIND: &'static str = "RobotMessage";
}
