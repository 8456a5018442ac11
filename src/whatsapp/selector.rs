//! Open chat resolution

use crate::whatsapp::contacts::{ChatKind, Collection};
use crate::whatsapp::normalize::{normalize_id, Identified};
use crate::whatsapp::reconciler::ContactBook;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// The chat currently open in the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSelection {
    pub chat_id: String,
    pub chat_type: ChatKind,
}

/// Who made the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOrigin {
    /// The user clicked a chat
    Manual,
    /// An inbound message surfaced the chat
    Incoming,
}

/// Collection refresh that just completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Synced,
    Unsynced,
}

#[derive(Debug, Clone)]
struct Current {
    selection: ChatSelection,
    origin: SelectionOrigin,
    selected_at: DateTime<Utc>,
    /// Not found in any collection when selected; exempt from the absence
    /// check until the unsynced collection has been refreshed
    provisional: bool,
}

/// Tracks the open chat for the active number
#[derive(Debug)]
pub struct ChatSelector {
    current: Option<Current>,
    /// How long a manual selection wins over incoming messages
    manual_hold: Duration,
}

impl Default for ChatSelector {
    fn default() -> Self {
        Self::new(Duration::seconds(15))
    }
}

impl ChatSelector {
    pub fn new(manual_hold: Duration) -> Self {
        Self {
            current: None,
            manual_hold,
        }
    }

    pub fn selection(&self) -> Option<&ChatSelection> {
        self.current.as_ref().map(|c| &c.selection)
    }

    pub fn is_provisional(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.provisional)
    }

    /// Select a chat, resolving it against synced then unsynced entries.
    ///
    /// Falls back to the given identifier when no collection knows it yet.
    pub fn select(
        &mut self,
        book: Option<&ContactBook>,
        id: &str,
        kind: ChatKind,
        origin: SelectionOrigin,
        now: DateTime<Utc>,
    ) -> &ChatSelection {
        let (selection, provisional) = match book.and_then(|b| resolve(b, id, kind)) {
            Some(selection) => (selection, false),
            None => (
                ChatSelection {
                    chat_id: normalize_id(id),
                    chat_type: kind,
                },
                true,
            ),
        };

        tracing::debug!(
            "Selected {} ({:?}, {:?}{})",
            selection.chat_id,
            selection.chat_type,
            origin,
            if provisional { ", provisional" } else { "" }
        );

        &self
            .current
            .insert(Current {
                selection,
                origin,
                selected_at: now,
                provisional,
            })
            .selection
    }

    /// Whether an incoming message may take over the selection
    pub fn can_auto_select(&self, now: DateTime<Utc>) -> bool {
        match &self.current {
            None => true,
            Some(current) => {
                current.origin == SelectionOrigin::Incoming
                    || now - current.selected_at >= self.manual_hold
            }
        }
    }

    pub fn clear(&mut self) -> bool {
        self.current.take().is_some()
    }

    /// Clear the selection when its chat is gone from every collection.
    ///
    /// Returns `true` if the selection was cleared.
    pub fn enforce(&mut self, book: Option<&ContactBook>) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        if current.provisional {
            return false;
        }
        let present = book.is_some_and(|b| exists(b, &current.selection));
        if !present {
            tracing::info!(
                "Selected chat {} no longer exists, clearing selection",
                current.selection.chat_id
            );
            self.current = None;
        }
        !present
    }

    /// Re-point the selection after a collection refresh and re-check it.
    ///
    /// Returns `true` if the selection changed.
    pub fn on_refreshed(&mut self, book: Option<&ContactBook>, refresh: Refresh) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        let mut changed = false;

        if let Some(book) = book {
            if exists(book, &current.selection) {
                current.provisional = false;
            } else if let Some((collection, contact)) =
                book.find_migrated(&current.selection.chat_id, current.selection.chat_type)
            {
                let migrated = ChatSelection {
                    chat_id: contact.identity(),
                    chat_type: kind_of(collection, contact.kind()),
                };
                tracing::info!(
                    "Selected chat moved from {} to {}",
                    current.selection.chat_id,
                    migrated.chat_id
                );
                current.selection = migrated;
                current.provisional = false;
                changed = true;
            }
        }

        if refresh == Refresh::Unsynced {
            current.provisional = false;
        }

        self.enforce(book) || changed
    }
}

fn resolve(book: &ContactBook, id: &str, kind: ChatKind) -> Option<ChatSelection> {
    let (collection, contact) = book.locate(id)?;
    Some(ChatSelection {
        chat_id: contact.identity(),
        chat_type: match collection {
            Collection::Unsynced => kind,
            _ => kind_of(collection, contact.kind()),
        },
    })
}

fn kind_of(collection: Collection, fallback: ChatKind) -> ChatKind {
    match collection {
        Collection::SyncedContacts => ChatKind::Contact,
        Collection::SyncedGroups => ChatKind::Group,
        Collection::Unsynced => fallback,
    }
}

fn exists(book: &ContactBook, selection: &ChatSelection) -> bool {
    let synced = match selection.chat_type {
        ChatKind::Contact => Collection::SyncedContacts,
        ChatKind::Group => Collection::SyncedGroups,
    };
    book.find_in(synced, &selection.chat_id).is_some()
        || book
            .find_in(Collection::Unsynced, &selection.chat_id)
            .is_some()
}
