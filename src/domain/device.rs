use crate::domain::command::Command;
use crate::domain::connection_state::ConnectionState;
use crate::domain::lamp_status::LampStatus;
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// The stateful link to one physical lamp. Only the dispatcher worker ever holds it, so implementations
/// need no internal locking.
#[async_trait]
pub trait Device: Debug + Send {
    fn device_id(&self) -> &str;

    fn state(&self) -> ConnectionState;

    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Transmits one command, connecting first when the link is down.
    async fn send(&mut self, command: &Command) -> Result<(), SendError>;

    /// Re-authenticates with a fresh local key and persists it on success.
    async fn refresh_key(&mut self) -> Result<(), RefreshError>;

    async fn heartbeat(&mut self) -> Result<(), SendError>;

    /// Reads the current settings back from the lamp.
    async fn status(&mut self) -> Result<LampStatus, SendError>;

    /// Idempotent.
    async fn disconnect(&mut self);
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device rejected the local key")]
    AuthRejected,
    #[error("connection timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("device rejected the key")]
    KeyRejected,
    #[error("device did not answer in time")]
    Timeout,
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl From<ConnectError> for SendError {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Unreachable(reason) => SendError::NotConnected(reason),
            ConnectError::AuthRejected => SendError::KeyRejected,
            ConnectError::Timeout => SendError::Timeout,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("no replacement key available")]
    NoCandidate,
    #[error("all {0} candidate key(s) were rejected")]
    Rejected(usize),
}
