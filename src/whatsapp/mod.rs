//! WhatsApp session core: numbers, connection lifecycle, contact
//! reconciliation and the realtime event dispatcher

pub mod contacts;
pub mod dispatcher;
pub mod events;
pub mod lifecycle;
pub mod normalize;
pub mod numbers;
pub mod qr;
pub mod reconciler;
pub mod selector;
pub mod session;

pub use contacts::{ChatKind, Collection, Contact, Group, RawDeviceContact, UnsyncedContact};
pub use dispatcher::{Input, RealtimeEventDispatcher, SessionHandle};
pub use events::{ChatHistoryUpdate, ConnectionEvent, ConnectionEventKind, RealtimeEvent};
pub use lifecycle::ConnectionLifecycle;
pub use numbers::{ConnectionStatus, NumberSettings, WhatsAppNumber};
pub use reconciler::{BulkOp, BulkScope, ContactBook, ContactReconciler, SyncCategory, SyncFilter};
pub use selector::{ChatSelection, ChatSelector};
pub use session::{Action, Command, Completion, Notice, Session};

use crate::api::ApiError;
use thiserror::Error;

/// Session core errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Stale reference to number {0}")]
    StaleReference(String),

    #[error("Bulk operation partially applied ({failed} of {total} failed)")]
    PartialBatch { failed: usize, total: usize },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unknown number: {0}")]
    UnknownNumber(String),

    #[error("Unknown chat: {0}")]
    UnknownChat(String),

    #[error("Nothing to sync: {0} selected entries are already synced")]
    AlreadySynced(usize),

    #[error("No contacts or groups selected")]
    NothingSelected,

    #[error("No number selected")]
    NoActiveNumber,

    #[error("Realtime channel error: {0}")]
    Realtime(String),
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::PartialBatch { failed, total } => SessionError::PartialBatch { failed, total },
            other => SessionError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_map_to_network_failure() {
        let err: SessionError = ApiError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        assert!(matches!(err, SessionError::Network(msg) if msg.contains("502")));

        let err: SessionError = ApiError::PartialBatch { failed: 2, total: 5 }.into();
        assert_eq!(err, SessionError::PartialBatch { failed: 2, total: 5 });
    }
}
