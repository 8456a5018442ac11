//! Dashboard backend REST contract

pub mod http;

pub use http::HttpBackend;

use crate::whatsapp::contacts::{Collection, Contact, Group, RawDeviceContact, UnsyncedContact};
use crate::whatsapp::numbers::{NumberSettings, WhatsAppNumber};
use crate::whatsapp::reconciler::AgentUpdate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// REST-layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Batch partially applied: {failed} of {total} items failed")]
    PartialBatch { failed: usize, total: usize },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Synced collections of a number
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncedCollections {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// Everything the session core asks of the backend
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn list_numbers(&self) -> Result<Vec<WhatsAppNumber>, ApiError>;

    async fn create_number(&self, name: &str, phone_number: &str) -> Result<WhatsAppNumber, ApiError>;

    async fn delete_number(&self, number_id: &str) -> Result<(), ApiError>;

    async fn update_number_settings(
        &self,
        number_id: &str,
        settings: NumberSettings,
    ) -> Result<(), ApiError>;

    /// Ask the backend worker to open a session; the QR arrives by push
    async fn start_session(&self, number_id: &str) -> Result<(), ApiError>;

    async fn fetch_device_contacts(&self, number_id: &str) -> Result<Vec<RawDeviceContact>, ApiError>;

    async fn fetch_synced(&self, number_id: &str) -> Result<SyncedCollections, ApiError>;

    async fn fetch_unsynced(&self, number_id: &str) -> Result<Vec<UnsyncedContact>, ApiError>;

    async fn promote(
        &self,
        number_id: &str,
        contact_ids: &[String],
        group_ids: &[String],
    ) -> Result<(), ApiError>;

    /// Delete a synced or unsynced entry
    async fn remove_chat(
        &self,
        number_id: &str,
        id: &str,
        collection: Collection,
    ) -> Result<(), ApiError>;

    async fn toggle_agent(&self, number_id: &str, id: &str, enabled: bool) -> Result<(), ApiError>;

    async fn bulk_toggle_agent(&self, number_id: &str, updates: &[AgentUpdate]) -> Result<(), ApiError>;

    async fn bulk_delete(&self, number_id: &str, ids: &[String]) -> Result<(), ApiError>;
}
