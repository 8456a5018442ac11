//! Contact and group records

use crate::whatsapp::normalize::{self, Identified};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of chat an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Contact,
    Group,
}

impl ChatKind {
    /// Kind implied by the identifier suffix
    pub fn of(id: &str) -> Self {
        if normalize::is_group_id(id) {
            Self::Group
        } else {
            Self::Contact
        }
    }
}

/// The three collections a chat entry can live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    SyncedContacts,
    SyncedGroups,
    Unsynced,
}

impl Collection {
    pub fn is_synced(self) -> bool {
        !matches!(self, Self::Unsynced)
    }
}

/// A chat entry: synced contact, synced group or unsynced sender.
///
/// The collection it lives in decides which of the three it is; groups are
/// additionally recognizable by the `@g.us` suffix on `wa_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Backend row id
    #[serde(default)]
    pub id: String,

    /// WhatsApp identifier (`<digits>@c.us` or `<id>@g.us`)
    #[serde(default, alias = "wa_id")]
    pub wa_id: String,

    #[serde(default)]
    pub name: String,

    /// Phone number (digits), empty for groups
    #[serde(default)]
    pub number: String,

    /// Unix seconds of the last message, 0 when unknown
    #[serde(default, alias = "last_message_timestamp")]
    pub last_message_timestamp: i64,

    #[serde(default, alias = "last_message_preview")]
    pub last_message_preview: Option<String>,

    /// Whether the AI agent answers this chat
    #[serde(default, alias = "agent_enabled")]
    pub agent_enabled: bool,
}

/// Synced groups share the contact shape
pub type Group = Contact;

/// First-time senders share the contact shape
pub type UnsyncedContact = Contact;

impl Contact {
    pub fn new(wa_id: &str, name: &str) -> Self {
        let wa_id = normalize::normalize_id(wa_id);
        Self {
            id: wa_id.clone(),
            number: normalize::phone_digits(&wa_id).unwrap_or_default(),
            wa_id,
            name: name.to_string(),
            last_message_timestamp: 0,
            last_message_preview: None,
            agent_enabled: false,
        }
    }

    /// Build a synced entry from a device snapshot record
    pub fn from_device(raw: &RawDeviceContact) -> Self {
        let mut contact = Self::new(&raw.id, &raw.name);
        if !raw.number.is_empty() {
            contact.number = raw.number.clone();
        }
        contact
    }

    /// Id the backend addresses this entry by
    pub fn row_id(&self) -> &str {
        if self.id.is_empty() {
            &self.wa_id
        } else {
            &self.id
        }
    }

    pub fn kind(&self) -> ChatKind {
        ChatKind::of(self.raw_id())
    }

    /// Display name (name > number > identifier)
    pub fn display_name(&self) -> &str {
        Some(self.name.as_str())
            .filter(|s| !s.is_empty())
            .or(Some(self.number.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or(self.raw_id())
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        if self.last_message_timestamp <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.last_message_timestamp, 0).single()
    }

    /// Record an inbound message
    ///
    /// Messages older than the latest one keep the stored preview.
    pub fn touch(&mut self, timestamp: i64, preview: Option<&str>) {
        if timestamp < self.last_message_timestamp {
            return;
        }
        self.last_message_timestamp = timestamp;
        if let Some(preview) = preview {
            self.last_message_preview = Some(preview.to_string());
        }
    }
}

impl Identified for Contact {
    fn raw_id(&self) -> &str {
        if self.wa_id.trim().is_empty() {
            &self.id
        } else {
            &self.wa_id
        }
    }
}

/// Contact as reported by the connected phone, never persisted here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeviceContact {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub number: String,

    #[serde(default, alias = "is_group")]
    pub is_group: bool,

    #[serde(default, alias = "is_my_contact")]
    pub is_my_contact: bool,
}

impl RawDeviceContact {
    pub fn personal(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            number: normalize::phone_digits(id).unwrap_or_default(),
            is_group: false,
            is_my_contact: true,
        }
    }

    pub fn group(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            number: String::new(),
            is_group: true,
            is_my_contact: false,
        }
    }
}

impl Identified for RawDeviceContact {
    fn raw_id(&self) -> &str {
        &self.id
    }
}
