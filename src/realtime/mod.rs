//! Realtime push channel scoped to one number ("room")

pub mod socket;

pub use socket::SocketChannel;

use crate::whatsapp::SessionError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealtimeError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Socket is closed")]
    Closed,

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Malformed frame: {0}")]
    Frame(String),
}

impl From<RealtimeError> for SessionError {
    fn from(err: RealtimeError) -> Self {
        SessionError::Realtime(err.to_string())
    }
}

/// Room membership on the push channel
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn join_room(&self, number_id: &str) -> Result<(), RealtimeError>;

    async fn leave_room(&self, number_id: &str) -> Result<(), RealtimeError>;
}
