//! In-memory backend and channel doubles for tests

use crate::api::{ApiError, BackendApi, SyncedCollections};
use crate::realtime::{RealtimeChannel, RealtimeError};
use crate::whatsapp::contacts::{Collection, RawDeviceContact, UnsyncedContact};
use crate::whatsapp::numbers::{NumberSettings, WhatsAppNumber};
use crate::whatsapp::reconciler::AgentUpdate;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

/// Scripted backend; every call is recorded as `"<method>:<number>"`
#[derive(Default)]
pub struct MockBackend {
    pub numbers: Mutex<Vec<WhatsAppNumber>>,
    pub synced: Mutex<HashMap<String, SyncedCollections>>,
    pub unsynced: Mutex<HashMap<String, Vec<UnsyncedContact>>>,
    pub device: Mutex<HashMap<String, Vec<RawDeviceContact>>>,
    /// Methods that answer with a 500
    pub failing: Mutex<HashSet<&'static str>>,
    /// When set, `fetch_synced` waits for a notification before answering
    pub synced_gate: Mutex<Option<Arc<Notify>>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn with_numbers(ids: &[&str]) -> Self {
        let backend = Self::default();
        *backend.numbers.lock() = ids
            .iter()
            .map(|id| WhatsAppNumber::new(id, id, "573000000000"))
            .collect();
        backend
    }

    pub fn fail(&self, method: &'static str) {
        self.failing.lock().insert(method);
    }

    pub fn gate_synced(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.synced_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, method: &'static str, number_id: &str) -> Result<(), ApiError> {
        self.calls.lock().push(format!("{}:{}", method, number_id));
        if self.failing.lock().contains(method) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("{} failed", method),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn list_numbers(&self) -> Result<Vec<WhatsAppNumber>, ApiError> {
        self.record("list_numbers", "*")?;
        Ok(self.numbers.lock().clone())
    }

    async fn create_number(&self, name: &str, phone_number: &str) -> Result<WhatsAppNumber, ApiError> {
        self.record("create_number", name)?;
        let number = WhatsAppNumber::new(&format!("id-{}", name), name, phone_number);
        self.numbers.lock().push(number.clone());
        Ok(number)
    }

    async fn delete_number(&self, number_id: &str) -> Result<(), ApiError> {
        self.record("delete_number", number_id)?;
        self.numbers.lock().retain(|n| n.id != number_id);
        Ok(())
    }

    async fn update_number_settings(
        &self,
        number_id: &str,
        _settings: NumberSettings,
    ) -> Result<(), ApiError> {
        self.record("update_number_settings", number_id)
    }

    async fn start_session(&self, number_id: &str) -> Result<(), ApiError> {
        self.record("start_session", number_id)
    }

    async fn fetch_device_contacts(&self, number_id: &str) -> Result<Vec<RawDeviceContact>, ApiError> {
        self.record("fetch_device_contacts", number_id)?;
        Ok(self.device.lock().get(number_id).cloned().unwrap_or_default())
    }

    async fn fetch_synced(&self, number_id: &str) -> Result<SyncedCollections, ApiError> {
        self.record("fetch_synced", number_id)?;
        let gate = self.synced_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.synced.lock().get(number_id).cloned().unwrap_or_default())
    }

    async fn fetch_unsynced(&self, number_id: &str) -> Result<Vec<UnsyncedContact>, ApiError> {
        self.record("fetch_unsynced", number_id)?;
        Ok(self.unsynced.lock().get(number_id).cloned().unwrap_or_default())
    }

    async fn promote(
        &self,
        number_id: &str,
        _contact_ids: &[String],
        _group_ids: &[String],
    ) -> Result<(), ApiError> {
        self.record("promote", number_id)
    }

    async fn remove_chat(
        &self,
        number_id: &str,
        _id: &str,
        _collection: Collection,
    ) -> Result<(), ApiError> {
        self.record("remove_chat", number_id)
    }

    async fn toggle_agent(&self, number_id: &str, _id: &str, _enabled: bool) -> Result<(), ApiError> {
        self.record("toggle_agent", number_id)
    }

    async fn bulk_toggle_agent(&self, number_id: &str, _updates: &[AgentUpdate]) -> Result<(), ApiError> {
        self.record("bulk_toggle_agent", number_id)
    }

    async fn bulk_delete(&self, number_id: &str, _ids: &[String]) -> Result<(), ApiError> {
        self.record("bulk_delete", number_id)
    }
}

/// Channel that records room changes as `"join:<id>"` / `"leave:<id>"`
#[derive(Default)]
pub struct RecordingChannel {
    pub log: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl RealtimeChannel for RecordingChannel {
    async fn join_room(&self, number_id: &str) -> Result<(), RealtimeError> {
        self.log.lock().push(format!("join:{}", number_id));
        Ok(())
    }

    async fn leave_room(&self, number_id: &str) -> Result<(), RealtimeError> {
        self.log.lock().push(format!("leave:{}", number_id));
        Ok(())
    }
}
