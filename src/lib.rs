//! robolink - a point-to-point TCP control link for remote robots
//!
//! A robot process hosts a [`link::RobotServer`] listening on the fixed
//! control port, a controller process connects with a [`link::RobotClient`],
//! and the two exchange typed messages through the envelope codec in
//! [`link::codec`]. [`robot::ConnectedRobot`] pairs a server with an
//! overridable message handler so a robot can react to each message and
//! optionally reply.

pub mod error;
pub mod link;
pub mod robot;

pub use error::{LinkError, Result};
pub use link::{CONTROL_PORT, RobotClient, RobotServer};
pub use link::messages::{Message, RobotMessage, Sender};
pub use robot::{ConnectedRobot, MessageHandler, NoopHandler};
