//! Tenant-owned WhatsApp lines

use serde::{Deserialize, Serialize};

/// Connection status of a number's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Automation switches of a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberSettings {
    #[serde(default)]
    pub ai_enabled: bool,

    /// Let the agent answer senders that aren't synced yet
    #[serde(default)]
    pub ai_unknown_enabled: bool,

    /// Let the agent answer in groups
    #[serde(default)]
    pub response_groups_enabled: bool,
}

/// A WhatsApp number managed from the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppNumber {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub phone_number: String,

    /// Owned by the connection lifecycle; the backend value is only a seed
    #[serde(default)]
    pub connection_status: ConnectionStatus,

    #[serde(flatten)]
    pub settings: NumberSettings,
}

impl WhatsAppNumber {
    pub fn new(id: &str, name: &str, phone_number: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            phone_number: phone_number.to_string(),
            connection_status: ConnectionStatus::Disconnected,
            settings: NumberSettings::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}
