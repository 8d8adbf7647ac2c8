//! Control link layer - TCP message exchange between controller and robot
//!
//! This module provides:
//! - Message types and the envelope codec
//! - The single-connection TCP server endpoint hosted by the robot
//! - The outbound client connector used by the controller
//! - Change notifications for observable properties

pub mod client;
pub mod codec;
pub mod messages;
pub mod notify;
pub mod server;

pub use client::{ClientConfig, RobotClient};
pub use codec::{EOF_SENTINEL, FrameCodec, decode, encode, is_complete_frame};
pub use messages::{Message, RobotMessage, Sender};
pub use notify::{Property, PropertyChanged};
pub use server::{RobotServer, ServerConfig};

/// Protocol-wide TCP port every endpoint binds and connects to.
pub const CONTROL_PORT: u16 = 11000;

/// Lock a std RwLock for reading, recovering the guard if a writer panicked.
pub(crate) fn read_lock<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

/// Lock a std RwLock for writing, recovering the guard if a writer panicked.
pub(crate) fn write_lock<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
