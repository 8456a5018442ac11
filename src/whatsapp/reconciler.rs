//! Contact reconciliation
//!
//! Keeps, per number, three non-overlapping collections (synced contacts,
//! synced groups, unsynced senders) plus the last device snapshot. All
//! writes go through [`ContactReconciler`]; collaborators only get shared
//! references to a [`ContactBook`].
//!
//! User mutations are two-phase: `apply_*` changes local state immediately
//! and returns a pending token, `settle_*` commits or reverts it once the
//! backend answered.

use crate::whatsapp::contacts::{ChatKind, Collection, Contact, RawDeviceContact};
use crate::whatsapp::normalize::{self, dedupe_by_id, normalize_id, Identified};
use crate::whatsapp::SessionError;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Slot {
    /// Insertion order, tie-breaker for equal timestamps
    seq: u64,
    contact: Contact,
}

/// Category filter of the "choose what to sync" view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncCategory {
    #[default]
    All,
    Contacts,
    Groups,
}

/// Search + category filter; never touches authoritative state
#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    pub query: String,
    pub category: SyncCategory,
}

impl SyncFilter {
    pub fn new(query: &str, category: SyncCategory) -> Self {
        Self {
            query: query.to_string(),
            category,
        }
    }

    fn matches(&self, raw: &RawDeviceContact) -> bool {
        let query = self.query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        raw.name.to_lowercase().contains(&query)
            || raw.number.contains(&query)
            || normalize::user_part(&raw.id).contains(&query)
    }
}

/// Device snapshot split against the synced collections
#[derive(Debug, Default)]
pub struct SyncView<'a> {
    /// Personal contacts that can still be synced (filtered)
    pub personal: Vec<&'a RawDeviceContact>,
    /// Groups that can still be synced (filtered)
    pub groups: Vec<&'a RawDeviceContact>,
    /// Personal contacts already synced
    pub synced_personal: Vec<&'a RawDeviceContact>,
    /// Groups already synced
    pub synced_groups: Vec<&'a RawDeviceContact>,
}

/// Bulk agent operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOp {
    EnableAll,
    DisableAll,
    DeleteAll,
}

/// Which synced collections a bulk operation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkScope {
    Contacts,
    Groups,
    #[default]
    All,
}

impl BulkScope {
    fn covers(self, collection: Collection) -> bool {
        match self {
            Self::Contacts => collection == Collection::SyncedContacts,
            Self::Groups => collection == Collection::SyncedGroups,
            Self::All => collection.is_synced(),
        }
    }
}

/// Optimistic agent toggle awaiting confirmation
#[derive(Debug, Clone)]
pub struct PendingToggle {
    pub op_id: Uuid,
    pub number_id: String,
    /// Normalized identifier
    pub id: String,
    /// Backend row id sent to the toggle endpoint
    pub row_id: String,
    pub collection: Collection,
    pub previous: bool,
    pub value: bool,
}

/// Optimistic removal awaiting confirmation
#[derive(Debug, Clone)]
pub struct PendingRemoval {
    pub op_id: Uuid,
    pub number_id: String,
    pub collection: Collection,
    removed: Slot,
}

impl PendingRemoval {
    pub fn contact(&self) -> &Contact {
        &self.removed.contact
    }

    pub fn row_id(&self) -> &str {
        self.removed.contact.row_id()
    }
}

/// Promotion validated against the device snapshot, not applied yet
#[derive(Debug, Clone)]
pub struct PendingPromotion {
    pub op_id: Uuid,
    pub number_id: String,
    pub contacts: Vec<RawDeviceContact>,
    pub groups: Vec<RawDeviceContact>,
}

impl PendingPromotion {
    pub fn contact_ids(&self) -> Vec<String> {
        self.contacts.iter().map(Identified::identity).collect()
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups.iter().map(Identified::identity).collect()
    }
}

/// One item of a bulk agent toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUpdate {
    pub id: String,
    pub enabled: bool,
}

/// Optimistic bulk operation awaiting confirmation
#[derive(Debug, Clone)]
pub struct PendingBulk {
    pub op_id: Uuid,
    pub number_id: String,
    pub op: BulkOp,
    pub scope: BulkScope,
    /// Affected entries as they were before the operation
    previous: Vec<(Collection, Slot)>,
}

impl PendingBulk {
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Backend row ids of the affected entries
    pub fn row_ids(&self) -> Vec<String> {
        self.previous
            .iter()
            .map(|(_, slot)| slot.contact.row_id().to_string())
            .collect()
    }

    pub fn updates(&self) -> Vec<AgentUpdate> {
        let enabled = self.op == BulkOp::EnableAll;
        self.previous
            .iter()
            .map(|(_, slot)| AgentUpdate {
                id: slot.contact.row_id().to_string(),
                enabled,
            })
            .collect()
    }
}

/// Collections of a single number
#[derive(Debug, Default)]
pub struct ContactBook {
    contacts: Vec<Slot>,
    groups: Vec<Slot>,
    unsynced: Vec<Slot>,
    device: Vec<RawDeviceContact>,
    next_seq: u64,
}

impl ContactBook {
    /// Synced contacts, newest message first
    pub fn contacts(&self) -> Vec<&Contact> {
        self.contacts.iter().map(|s| &s.contact).collect()
    }

    /// Synced groups, newest message first
    pub fn groups(&self) -> Vec<&Contact> {
        self.groups.iter().map(|s| &s.contact).collect()
    }

    /// Unsynced senders, newest message first
    pub fn unsynced(&self) -> Vec<&Contact> {
        self.unsynced.iter().map(|s| &s.contact).collect()
    }

    pub fn device_snapshot(&self) -> &[RawDeviceContact] {
        &self.device
    }

    /// Find an entry by identifier; synced collections take precedence
    pub fn locate(&self, id: &str) -> Option<(Collection, &Contact)> {
        let key = normalize_id(id);
        [
            Collection::SyncedContacts,
            Collection::SyncedGroups,
            Collection::Unsynced,
        ]
        .into_iter()
        .find_map(|c| self.find_in(c, &key).map(|contact| (c, contact)))
    }

    pub fn find_in(&self, collection: Collection, id: &str) -> Option<&Contact> {
        let key = normalize_id(id);
        self.slots(collection)
            .iter()
            .find(|s| s.contact.identity() == key)
            .map(|s| &s.contact)
    }

    /// Find an entry whose identifier has the same user part but a
    /// different form (e.g. a phone number that gained its suffix)
    pub fn find_migrated(&self, id: &str, kind: ChatKind) -> Option<(Collection, &Contact)> {
        let user = normalize::user_part(id);
        if user.is_empty() {
            return None;
        }
        let collections: &[Collection] = match kind {
            ChatKind::Contact => &[Collection::SyncedContacts, Collection::Unsynced],
            ChatKind::Group => &[Collection::SyncedGroups, Collection::Unsynced],
        };
        collections.iter().find_map(|&c| {
            self.slots(c)
                .iter()
                .map(|s| &s.contact)
                .filter(|contact| contact.kind() == kind)
                .find(|contact| {
                    normalize::user_part(contact.raw_id()) == user
                        || normalize::user_part(&contact.id) == user
                        || (!contact.number.is_empty() && contact.number == user)
                })
                .map(|contact| (c, contact))
        })
    }

    pub fn is_synced(&self, id: &str) -> bool {
        self.locate(id).is_some_and(|(c, _)| c.is_synced())
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.slots(collection).len()
    }

    /// Split the device snapshot into what can still be synced and what
    /// already is, then apply the filter to the former.
    pub fn sync_view(&self, filter: &SyncFilter) -> SyncView<'_> {
        let synced_contacts = identities(&self.contacts);
        let synced_groups = identities(&self.groups);
        let mut seen = HashSet::new();
        let mut view = SyncView::default();

        for raw in &self.device {
            let key = raw.identity();
            if !seen.insert(key.clone()) {
                continue;
            }
            if raw.is_group {
                if synced_groups.contains(&key) {
                    view.synced_groups.push(raw);
                } else if filter.category != SyncCategory::Contacts && filter.matches(raw) {
                    view.groups.push(raw);
                }
            } else if raw.is_my_contact {
                if synced_contacts.contains(&key) {
                    view.synced_personal.push(raw);
                } else if filter.category != SyncCategory::Groups && filter.matches(raw) {
                    view.personal.push(raw);
                }
            }
        }
        view
    }

    /// Identifiers present in more than one collection; always empty unless
    /// there is a bug in this module
    pub fn overlapping_ids(&self) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for slot in self.contacts.iter().chain(&self.groups).chain(&self.unsynced) {
            *counts.entry(slot.contact.identity()).or_default() += 1;
        }
        let mut overlapping: Vec<String> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, _)| id)
            .collect();
        overlapping.sort();
        overlapping
    }

    fn slots(&self, collection: Collection) -> &Vec<Slot> {
        match collection {
            Collection::SyncedContacts => &self.contacts,
            Collection::SyncedGroups => &self.groups,
            Collection::Unsynced => &self.unsynced,
        }
    }

    fn slots_mut(&mut self, collection: Collection) -> &mut Vec<Slot> {
        match collection {
            Collection::SyncedContacts => &mut self.contacts,
            Collection::SyncedGroups => &mut self.groups,
            Collection::Unsynced => &mut self.unsynced,
        }
    }

    fn position(&self, collection: Collection, key: &str) -> Option<usize> {
        self.slots(collection)
            .iter()
            .position(|s| s.contact.identity() == key)
    }

    fn locate_mut(&mut self, key: &str) -> Option<(Collection, &mut Contact)> {
        for collection in [
            Collection::SyncedContacts,
            Collection::SyncedGroups,
            Collection::Unsynced,
        ] {
            if let Some(index) = self.position(collection, key) {
                return Some((collection, &mut self.slots_mut(collection)[index].contact));
            }
        }
        None
    }

    fn take(&mut self, collection: Collection, key: &str) -> Option<Slot> {
        let index = self.position(collection, key)?;
        Some(self.slots_mut(collection).remove(index))
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Rebuild a collection from a fresh list, keeping the insertion order
    /// of entries that were already known
    fn rebuild(&mut self, collection: Collection, incoming: Vec<Contact>) {
        let known: HashMap<String, u64> = self
            .slots(collection)
            .iter()
            .map(|s| (s.contact.identity(), s.seq))
            .collect();

        let slots: Vec<Slot> = incoming
            .into_iter()
            .map(|contact| {
                let seq = match known.get(&contact.identity()) {
                    Some(&seq) => seq,
                    None => self.next_seq(),
                };
                Slot { seq, contact }
            })
            .collect();
        *self.slots_mut(collection) = slots;
        self.sort(collection);
    }

    fn insert(&mut self, collection: Collection, slot: Slot) {
        self.slots_mut(collection).push(slot);
        self.sort(collection);
    }

    /// Newest message first, ties by insertion order
    fn sort(&mut self, collection: Collection) {
        self.slots_mut(collection)
            .sort_by_key(|s| (Reverse(s.contact.last_message_timestamp), s.seq));
    }

    fn check_invariants(&self, number_id: &str) {
        let overlapping = self.overlapping_ids();
        if !overlapping.is_empty() {
            let err = SessionError::InvariantViolation(format!(
                "{} ids in two collections for {}: {:?}",
                overlapping.len(),
                number_id,
                overlapping
            ));
            tracing::error!("{}", err);
            debug_assert!(false, "{}", err);
        }
    }
}

fn identities(slots: &[Slot]) -> HashSet<String> {
    slots.iter().map(|s| s.contact.identity()).collect()
}

/// Owner of every number's contact collections
#[derive(Debug, Default)]
pub struct ContactReconciler {
    books: HashMap<String, ContactBook>,
}

impl ContactReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(&self, number_id: &str) -> Option<&ContactBook> {
        self.books.get(number_id)
    }

    fn book_mut(&mut self, number_id: &str) -> Result<&mut ContactBook, SessionError> {
        self.books
            .get_mut(number_id)
            .ok_or_else(|| SessionError::UnknownNumber(number_id.to_string()))
    }

    /// Make sure a number has a (possibly empty) book
    pub fn open(&mut self, number_id: &str) -> &ContactBook {
        self.books.entry(number_id.to_string()).or_default()
    }

    /// Drop everything scoped to a number
    pub fn evict(&mut self, number_id: &str) -> bool {
        let evicted = self.books.remove(number_id).is_some();
        if evicted {
            tracing::info!("Evicted contact state for {}", number_id);
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.books.clear();
    }

    /// Replace the device snapshot
    pub fn replace_device_snapshot(&mut self, number_id: &str, raw: Vec<RawDeviceContact>) {
        let book = self.books.entry(number_id.to_string()).or_default();
        book.device = dedupe_by_id(raw);
        tracing::debug!(
            "Device snapshot for {}: {} entries",
            number_id,
            book.device.len()
        );
    }

    /// Replace both synced collections with the backend's view.
    ///
    /// Entries are routed by identifier suffix, so a group that arrives in
    /// the contact list still lands in the groups collection. Anything now
    /// synced leaves the unsynced collection.
    pub fn replace_synced(&mut self, number_id: &str, contacts: Vec<Contact>, groups: Vec<Contact>) {
        let book = self.books.entry(number_id.to_string()).or_default();

        let (groups, contacts): (Vec<Contact>, Vec<Contact>) = dedupe_by_id(
            contacts.into_iter().chain(groups).collect(),
        )
        .into_iter()
        .partition(|c| c.kind() == ChatKind::Group);

        let synced: HashSet<String> = contacts
            .iter()
            .chain(groups.iter())
            .map(Identified::identity)
            .collect();

        let before = book.unsynced.len();
        book.unsynced.retain(|s| !synced.contains(&s.contact.identity()));
        if book.unsynced.len() != before {
            tracing::debug!(
                "{} unsynced entries for {} are now synced",
                before - book.unsynced.len(),
                number_id
            );
        }

        book.rebuild(Collection::SyncedContacts, contacts);
        book.rebuild(Collection::SyncedGroups, groups);
        tracing::info!(
            "Synced collections for {}: {} contacts, {} groups",
            number_id,
            book.contacts.len(),
            book.groups.len()
        );
        book.check_invariants(number_id);
    }

    /// Replace the unsynced collection; entries already synced are dropped
    pub fn replace_unsynced(&mut self, number_id: &str, unsynced: Vec<Contact>) {
        let book = self.books.entry(number_id.to_string()).or_default();
        let synced: HashSet<String> = identities(&book.contacts)
            .into_iter()
            .chain(identities(&book.groups))
            .collect();

        let unsynced: Vec<Contact> = dedupe_by_id(unsynced)
            .into_iter()
            .filter(|c| !synced.contains(&c.identity()))
            .collect();

        book.rebuild(Collection::Unsynced, unsynced);
        tracing::info!(
            "Unsynced collection for {}: {} senders",
            number_id,
            book.unsynced.len()
        );
        book.check_invariants(number_id);
    }

    /// Record an inbound message on whichever collection holds the chat.
    ///
    /// Returns the collection that was updated, `None` if the chat is unknown.
    pub fn record_message(
        &mut self,
        number_id: &str,
        id: &str,
        timestamp: i64,
        preview: Option<&str>,
    ) -> Option<Collection> {
        let book = self.books.get_mut(number_id)?;
        let key = normalize_id(id);
        let (collection, contact) = book.locate_mut(&key)?;
        contact.touch(timestamp, preview);
        book.sort(collection);
        Some(collection)
    }

    /// Validate a promotion of device contacts/groups. Nothing changes until
    /// [`Self::commit_promotion`].
    pub fn begin_promotion(
        &self,
        number_id: &str,
        contact_ids: &[String],
        group_ids: &[String],
    ) -> Result<PendingPromotion, SessionError> {
        let book = self
            .books
            .get(number_id)
            .ok_or_else(|| SessionError::UnknownNumber(number_id.to_string()))?;

        if contact_ids.is_empty() && group_ids.is_empty() {
            return Err(SessionError::NothingSelected);
        }

        let mut pending = PendingPromotion {
            op_id: Uuid::new_v4(),
            number_id: number_id.to_string(),
            contacts: Vec::new(),
            groups: Vec::new(),
        };
        let mut already_synced = 0;
        let mut seen = HashSet::new();

        for id in contact_ids.iter().chain(group_ids) {
            let key = normalize_id(id);
            if !seen.insert(key.clone()) {
                continue;
            }
            if book.is_synced(&key) {
                already_synced += 1;
                continue;
            }
            let raw = book
                .device
                .iter()
                .find(|r| r.identity() == key)
                .cloned()
                .or_else(|| {
                    book.find_in(Collection::Unsynced, &key).map(|c| RawDeviceContact {
                        id: key.clone(),
                        name: c.name.clone(),
                        number: c.number.clone(),
                        is_group: c.kind() == ChatKind::Group,
                        is_my_contact: false,
                    })
                })
                .ok_or_else(|| SessionError::UnknownChat(key.clone()))?;

            if raw.is_group || normalize::is_group_id(&key) {
                pending.groups.push(raw);
            } else {
                pending.contacts.push(raw);
            }
        }

        if pending.contacts.is_empty() && pending.groups.is_empty() {
            return Err(SessionError::AlreadySynced(already_synced));
        }
        Ok(pending)
    }

    /// Move promoted entries into the synced collections
    pub fn commit_promotion(&mut self, pending: PendingPromotion) -> Result<usize, SessionError> {
        let book = self.book_mut(&pending.number_id)?;
        let mut moved = 0;

        let entries = pending
            .contacts
            .iter()
            .map(|raw| (Collection::SyncedContacts, raw))
            .chain(pending.groups.iter().map(|raw| (Collection::SyncedGroups, raw)));

        for (target, raw) in entries {
            let key = raw.identity();
            if book.is_synced(&key) {
                continue;
            }
            let mut contact = Contact::from_device(raw);
            let seq = match book.take(Collection::Unsynced, &key) {
                Some(previous) => {
                    contact.last_message_timestamp = previous.contact.last_message_timestamp;
                    contact.last_message_preview = previous.contact.last_message_preview;
                    if !previous.contact.id.is_empty() {
                        contact.id = previous.contact.id;
                    }
                    previous.seq
                }
                None => book.next_seq(),
            };
            book.insert(target, Slot { seq, contact });
            moved += 1;
        }

        tracing::info!(
            "Promoted {} entries for {} (op {})",
            moved,
            pending.number_id,
            pending.op_id
        );
        book.check_invariants(&pending.number_id);
        Ok(moved)
    }

    /// Strip an entry from whichever collection holds it
    pub fn apply_remove(&mut self, number_id: &str, id: &str) -> Result<PendingRemoval, SessionError> {
        let book = self.book_mut(number_id)?;
        let key = normalize_id(id);
        let (collection, _) = book
            .locate(&key)
            .ok_or_else(|| SessionError::UnknownChat(key.clone()))?;
        let removed = book
            .take(collection, &key)
            .ok_or_else(|| SessionError::UnknownChat(key.clone()))?;

        Ok(PendingRemoval {
            op_id: Uuid::new_v4(),
            number_id: number_id.to_string(),
            collection,
            removed,
        })
    }

    /// Confirm or revert a removal. A reverted entry is only restored when
    /// nothing else re-added it in the meantime.
    pub fn settle_remove(&mut self, pending: PendingRemoval, confirmed: bool) {
        if confirmed {
            tracing::debug!("Removal {} confirmed", pending.op_id);
            return;
        }
        let Some(book) = self.books.get_mut(&pending.number_id) else {
            return;
        };
        let key = pending.removed.contact.identity();
        if book.locate(&key).is_none() {
            tracing::warn!("Reverting removal of {} on {}", key, pending.number_id);
            book.insert(pending.collection, pending.removed);
        }
        book.check_invariants(&pending.number_id);
    }

    /// Flip `agent_enabled` in place
    pub fn apply_toggle(
        &mut self,
        number_id: &str,
        id: &str,
        value: bool,
    ) -> Result<PendingToggle, SessionError> {
        let book = self.book_mut(number_id)?;
        let key = normalize_id(id);
        let (collection, contact) = book
            .locate_mut(&key)
            .ok_or_else(|| SessionError::UnknownChat(key.clone()))?;

        let previous = contact.agent_enabled;
        contact.agent_enabled = value;

        Ok(PendingToggle {
            op_id: Uuid::new_v4(),
            number_id: number_id.to_string(),
            row_id: contact.row_id().to_string(),
            id: key,
            collection,
            previous,
            value,
        })
    }

    /// Confirm or revert a toggle. The revert only applies while the entry
    /// still carries the optimistic value.
    pub fn settle_toggle(&mut self, pending: PendingToggle, confirmed: bool) -> bool {
        if confirmed {
            return true;
        }
        let Some(book) = self.books.get_mut(&pending.number_id) else {
            return false;
        };
        match book.locate_mut(&pending.id) {
            Some((_, contact)) if contact.agent_enabled == pending.value => {
                tracing::warn!(
                    "Reverting agent toggle of {} to {}",
                    pending.id,
                    pending.previous
                );
                contact.agent_enabled = pending.previous;
                true
            }
            _ => false,
        }
    }

    /// Apply a bulk operation to every synced entry in scope
    pub fn apply_bulk(
        &mut self,
        number_id: &str,
        op: BulkOp,
        scope: BulkScope,
    ) -> Result<PendingBulk, SessionError> {
        let book = self.book_mut(number_id)?;
        let mut previous = Vec::new();

        for collection in [Collection::SyncedContacts, Collection::SyncedGroups] {
            if !scope.covers(collection) {
                continue;
            }
            match op {
                BulkOp::DeleteAll => {
                    previous.extend(
                        book.slots_mut(collection)
                            .drain(..)
                            .map(|slot| (collection, slot)),
                    );
                }
                BulkOp::EnableAll | BulkOp::DisableAll => {
                    let enabled = op == BulkOp::EnableAll;
                    for slot in book.slots_mut(collection).iter_mut() {
                        previous.push((collection, slot.clone()));
                        slot.contact.agent_enabled = enabled;
                    }
                }
            }
        }

        Ok(PendingBulk {
            op_id: Uuid::new_v4(),
            number_id: number_id.to_string(),
            op,
            scope,
            previous,
        })
    }

    /// Confirm or revert a bulk operation entry by entry. Like
    /// [`settle_toggle`](Self::settle_toggle), an agent flag is only reverted
    /// while it still carries the bulk's value.
    pub fn settle_bulk(&mut self, pending: PendingBulk, confirmed: bool) {
        if confirmed {
            tracing::debug!("Bulk {:?} confirmed ({} entries)", pending.op, pending.len());
            return;
        }
        let Some(book) = self.books.get_mut(&pending.number_id) else {
            return;
        };
        tracing::warn!(
            "Reverting bulk {:?} on {} ({} entries)",
            pending.op,
            pending.number_id,
            pending.len()
        );

        for (collection, slot) in pending.previous {
            let key = slot.contact.identity();
            match pending.op {
                BulkOp::DeleteAll => {
                    if book.locate(&key).is_none() {
                        book.slots_mut(collection).push(slot);
                    }
                }
                BulkOp::EnableAll | BulkOp::DisableAll => {
                    let applied = pending.op == BulkOp::EnableAll;
                    if let Some(index) = book.position(collection, &key) {
                        let contact = &mut book.slots_mut(collection)[index].contact;
                        if contact.agent_enabled == applied {
                            contact.agent_enabled = slot.contact.agent_enabled;
                        }
                    }
                }
            }
        }
        book.sort(Collection::SyncedContacts);
        book.sort(Collection::SyncedGroups);
        book.check_invariants(&pending.number_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: &str = "n1";

    fn contact(id: &str, ts: i64) -> Contact {
        let mut c = Contact::new(id, id);
        c.last_message_timestamp = ts;
        c
    }

    fn timestamps(list: &[&Contact]) -> Vec<i64> {
        list.iter().map(|c| c.last_message_timestamp).collect()
    }

    fn ids(list: &[&Contact]) -> Vec<String> {
        list.iter().map(|c| c.identity()).collect()
    }

    fn assert_disjoint(reconciler: &ContactReconciler) {
        if let Some(book) = reconciler.book(N) {
            assert!(book.overlapping_ids().is_empty());
        }
    }

    #[test]
    fn test_scenario_a_single_personal_contact_is_unsynced() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![], vec![]);
        reconciler.replace_device_snapshot(
            N,
            vec![RawDeviceContact {
                id: "573001112233".into(),
                name: "Ana".into(),
                number: "573001112233".into(),
                is_group: false,
                is_my_contact: true,
            }],
        );

        let book = reconciler.book(N).unwrap();
        let view = book.sync_view(&SyncFilter::default());
        assert_eq!(view.personal.len(), 1);
        assert_eq!(view.personal[0].identity(), "573001112233@c.us");
        assert!(view.groups.is_empty());
    }

    #[test]
    fn test_sync_view_partitions_and_filters() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("111", 0)], vec![contact("g1@g.us", 0)]);
        reconciler.replace_device_snapshot(
            N,
            vec![
                RawDeviceContact::personal("111", "Synced Sam"),
                RawDeviceContact::personal("222", "Bob"),
                RawDeviceContact::personal("333", "Carla"),
                RawDeviceContact {
                    is_my_contact: false,
                    ..RawDeviceContact::personal("444", "Stranger")
                },
                RawDeviceContact::group("g1@g.us", "Synced Group"),
                RawDeviceContact::group("g2@g.us", "Bob's Group"),
            ],
        );
        let book = reconciler.book(N).unwrap();

        let view = book.sync_view(&SyncFilter::default());
        assert_eq!(view.personal.len(), 2);
        assert_eq!(view.groups.len(), 1);
        assert_eq!(view.synced_personal.len(), 1);
        assert_eq!(view.synced_groups.len(), 1);

        let view = book.sync_view(&SyncFilter::new("bob", SyncCategory::All));
        assert_eq!(view.personal.len(), 1);
        assert_eq!(view.groups.len(), 1);

        let view = book.sync_view(&SyncFilter::new("bob", SyncCategory::Groups));
        assert!(view.personal.is_empty());
        assert_eq!(view.groups[0].id, "g2@g.us");

        let view = book.sync_view(&SyncFilter::new("", SyncCategory::Contacts));
        assert!(view.groups.is_empty());
        assert_eq!(view.personal.len(), 2);
        assert_eq!(book.device_snapshot().len(), 6);
    }

    #[test]
    fn test_lists_sorted_newest_first_with_insertion_ties() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(
            N,
            vec![contact("1", 100), contact("2", 300), contact("3", 100), contact("4", 200)],
            vec![],
        );
        let book = reconciler.book(N).unwrap();
        assert_eq!(timestamps(&book.contacts()), vec![300, 200, 100, 100]);
        assert_eq!(
            ids(&book.contacts()),
            vec!["2@c.us", "4@c.us", "1@c.us", "3@c.us"]
        );
    }

    #[test]
    fn test_scenario_b_message_moves_contact_to_top() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(
            N,
            vec![contact("573009998888", 100), contact("573001111111", 150)],
            vec![],
        );

        let collection =
            reconciler.record_message(N, "573009998888@c.us", 200, Some("hola"));
        assert_eq!(collection, Some(Collection::SyncedContacts));

        let book = reconciler.book(N).unwrap();
        let first = book.contacts()[0];
        assert_eq!(first.identity(), "573009998888@c.us");
        assert_eq!(first.last_message_timestamp, 200);
        assert_eq!(first.last_message_preview.as_deref(), Some("hola"));
        assert_eq!(timestamps(&book.contacts()), vec![200, 150]);
    }

    #[test]
    fn test_group_in_contact_list_is_routed_to_groups() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 0), contact("g@g.us", 0)], vec![]);
        let book = reconciler.book(N).unwrap();
        assert_eq!(book.len(Collection::SyncedContacts), 1);
        assert_eq!(book.len(Collection::SyncedGroups), 1);
        assert!(book
            .contacts()
            .iter()
            .all(|c| !c.wa_id.ends_with(normalize::GROUP_SUFFIX)));
    }

    #[test]
    fn test_synced_wins_over_unsynced() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_unsynced(N, vec![contact("1", 10), contact("2", 20)]);
        reconciler.replace_synced(N, vec![contact("1", 10)], vec![]);
        assert_disjoint(&reconciler);
        assert_eq!(reconciler.book(N).unwrap().len(Collection::Unsynced), 1);

        reconciler.replace_unsynced(N, vec![contact("1", 10), contact("2", 20), contact("2@c.us", 5)]);
        let book = reconciler.book(N).unwrap();
        assert_eq!(ids(&book.unsynced()), vec!["2@c.us"]);
        assert_disjoint(&reconciler);
    }

    #[test]
    fn test_promotion_moves_unsynced_sender() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![], vec![]);
        reconciler.replace_unsynced(N, vec![contact("555", 40)]);

        let pending = reconciler
            .begin_promotion(N, &["555".to_string()], &[])
            .unwrap();
        assert_eq!(pending.contact_ids(), vec!["555@c.us"]);
        // nothing moves before commit
        assert_eq!(reconciler.book(N).unwrap().len(Collection::Unsynced), 1);

        assert_eq!(reconciler.commit_promotion(pending).unwrap(), 1);
        let book = reconciler.book(N).unwrap();
        assert_eq!(book.len(Collection::Unsynced), 0);
        assert_eq!(book.contacts()[0].last_message_timestamp, 40);
        assert!(!book.contacts()[0].agent_enabled);
        assert_disjoint(&reconciler);
    }

    #[test]
    fn test_promotion_validation() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 0)], vec![]);
        reconciler.replace_device_snapshot(N, vec![RawDeviceContact::group("g@g.us", "G")]);

        assert!(matches!(
            reconciler.begin_promotion(N, &[], &[]),
            Err(SessionError::NothingSelected)
        ));
        assert!(matches!(
            reconciler.begin_promotion(N, &["1".into()], &[]),
            Err(SessionError::AlreadySynced(1))
        ));
        assert!(matches!(
            reconciler.begin_promotion(N, &["999".into()], &[]),
            Err(SessionError::UnknownChat(_))
        ));
        assert!(matches!(
            reconciler.begin_promotion("other", &["1".into()], &[]),
            Err(SessionError::UnknownNumber(_))
        ));

        let pending = reconciler
            .begin_promotion(N, &["1".into()], &["g@g.us".into()])
            .unwrap();
        assert_eq!(pending.group_ids(), vec!["g@g.us"]);
        assert!(pending.contacts.is_empty());
    }

    #[test]
    fn test_promote_then_remove_round_trip() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 0)], vec![]);
        reconciler.replace_device_snapshot(
            N,
            vec![
                RawDeviceContact::personal("1", "One"),
                RawDeviceContact::personal("2", "Two"),
            ],
        );
        let before: Vec<String> = ids(&reconciler.book(N).unwrap().contacts());
        let candidates_before = reconciler
            .book(N)
            .unwrap()
            .sync_view(&SyncFilter::default())
            .personal
            .len();

        let pending = reconciler.begin_promotion(N, &["2".into()], &[]).unwrap();
        reconciler.commit_promotion(pending).unwrap();
        assert_eq!(reconciler.book(N).unwrap().len(Collection::SyncedContacts), 2);

        let removal = reconciler.apply_remove(N, "2@c.us").unwrap();
        reconciler.settle_remove(removal, true);

        let book = reconciler.book(N).unwrap();
        assert_eq!(ids(&book.contacts()), before);
        assert_eq!(book.sync_view(&SyncFilter::default()).personal.len(), candidates_before);
    }

    #[test]
    fn test_failed_removal_is_restored() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 10), contact("2", 20)], vec![]);
        let removal = reconciler.apply_remove(N, "1").unwrap();
        assert_eq!(removal.collection, Collection::SyncedContacts);
        assert_eq!(reconciler.book(N).unwrap().len(Collection::SyncedContacts), 1);

        reconciler.settle_remove(removal, false);
        let book = reconciler.book(N).unwrap();
        assert_eq!(timestamps(&book.contacts()), vec![20, 10]);
    }

    #[test]
    fn test_remove_unsynced_entry() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_unsynced(N, vec![contact("9", 1)]);
        let removal = reconciler.apply_remove(N, "9@c.us").unwrap();
        assert_eq!(removal.collection, Collection::Unsynced);
        assert_eq!(removal.contact().identity(), "9@c.us");
        assert!(reconciler.book(N).unwrap().locate("9").is_none());
        assert!(matches!(
            reconciler.apply_remove(N, "9"),
            Err(SessionError::UnknownChat(_))
        ));
    }

    #[test]
    fn test_scenario_d_failed_toggle_reverts() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 0)], vec![]);

        let pending = reconciler.apply_toggle(N, "1", true).unwrap();
        assert!(reconciler.book(N).unwrap().contacts()[0].agent_enabled);
        assert!(!pending.previous);

        assert!(reconciler.settle_toggle(pending, false));
        assert!(!reconciler.book(N).unwrap().contacts()[0].agent_enabled);
    }

    #[test]
    fn test_toggle_revert_skips_when_value_changed_since() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 0)], vec![]);
        let pending = reconciler.apply_toggle(N, "1", true).unwrap();

        let mut refreshed = contact("1", 0);
        refreshed.agent_enabled = false;
        reconciler.replace_synced(N, vec![refreshed], vec![]);

        assert!(!reconciler.settle_toggle(pending, false));
        assert!(!reconciler.book(N).unwrap().contacts()[0].agent_enabled);
    }

    #[test]
    fn test_bulk_toggle_and_revert() {
        let mut reconciler = ContactReconciler::new();
        let mut enabled = contact("2", 0);
        enabled.agent_enabled = true;
        reconciler.replace_synced(N, vec![contact("1", 0), enabled], vec![contact("g@g.us", 0)]);

        let pending = reconciler
            .apply_bulk(N, BulkOp::DisableAll, BulkScope::Contacts)
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.updates().iter().all(|u| !u.enabled));
        let book = reconciler.book(N).unwrap();
        assert!(book.contacts().iter().all(|c| !c.agent_enabled));

        reconciler.settle_bulk(pending, false);
        let book = reconciler.book(N).unwrap();
        let flags: Vec<bool> = book.contacts().iter().map(|c| c.agent_enabled).collect();
        assert_eq!(flags, vec![false, true]);

        let pending = reconciler
            .apply_bulk(N, BulkOp::EnableAll, BulkScope::All)
            .unwrap();
        assert_eq!(pending.len(), 3);
        reconciler.settle_bulk(pending, true);
        let book = reconciler.book(N).unwrap();
        assert!(book.groups()[0].agent_enabled);
    }

    #[test]
    fn test_bulk_revert_keeps_later_toggle() {
        let mut reconciler = ContactReconciler::new();
        let mut enabled = contact("2", 0);
        enabled.agent_enabled = true;
        reconciler.replace_synced(N, vec![contact("1", 0), enabled], vec![]);

        let bulk = reconciler
            .apply_bulk(N, BulkOp::DisableAll, BulkScope::Contacts)
            .unwrap();
        let toggle = reconciler.apply_toggle(N, "1", true).unwrap();
        assert!(reconciler.settle_toggle(toggle, true));

        reconciler.settle_bulk(bulk, false);
        let book = reconciler.book(N).unwrap();
        let flag = |id: &str| book.locate(id).unwrap().1.agent_enabled;
        assert!(flag("1@c.us"));
        assert!(flag("2@c.us"));
    }

    #[test]
    fn test_bulk_delete_and_revert() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 5), contact("2", 9)], vec![contact("g@g.us", 0)]);

        let pending = reconciler
            .apply_bulk(N, BulkOp::DeleteAll, BulkScope::All)
            .unwrap();
        assert_eq!(pending.row_ids().len(), 3);
        let book = reconciler.book(N).unwrap();
        assert_eq!(book.len(Collection::SyncedContacts), 0);
        assert_eq!(book.len(Collection::SyncedGroups), 0);

        reconciler.settle_bulk(pending, false);
        let book = reconciler.book(N).unwrap();
        assert_eq!(timestamps(&book.contacts()), vec![9, 5]);
        assert_eq!(book.len(Collection::SyncedGroups), 1);
    }

    #[test]
    fn test_find_migrated_identifier() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_unsynced(N, vec![contact("573001112233@s.whatsapp.net", 0)]);
        let book = reconciler.book(N).unwrap();
        let (collection, found) = book
            .find_migrated("573001112233", ChatKind::Contact)
            .unwrap();
        assert_eq!(collection, Collection::Unsynced);
        assert_eq!(found.identity(), "573001112233@c.us");
        assert!(book.find_migrated("573001112233", ChatKind::Group).is_none());
    }

    #[test]
    fn test_membership_stays_disjoint_across_operations() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_device_snapshot(
            N,
            (1..=6)
                .map(|i| RawDeviceContact::personal(&i.to_string(), "x"))
                .collect(),
        );
        reconciler.replace_synced(N, vec![contact("1", 1), contact("2", 2)], vec![]);
        reconciler.replace_unsynced(N, vec![contact("2", 2), contact("3", 3), contact("4", 4)]);
        assert_disjoint(&reconciler);

        let pending = reconciler
            .begin_promotion(N, &["3".into(), "5".into()], &[])
            .unwrap();
        reconciler.commit_promotion(pending).unwrap();
        assert_disjoint(&reconciler);

        reconciler.replace_unsynced(N, vec![contact("3", 3), contact("4", 4), contact("6", 6)]);
        assert_disjoint(&reconciler);

        let removal = reconciler.apply_remove(N, "4").unwrap();
        reconciler.settle_remove(removal, false);
        assert_disjoint(&reconciler);

        let bulk = reconciler
            .apply_bulk(N, BulkOp::DeleteAll, BulkScope::All)
            .unwrap();
        reconciler.replace_unsynced(N, vec![contact("1", 1)]);
        reconciler.settle_bulk(bulk, false);
        assert_disjoint(&reconciler);

        let book = reconciler.book(N).unwrap();
        for list in [book.contacts(), book.groups(), book.unsynced()] {
            let ts = timestamps(&list);
            assert!(ts.windows(2).all(|w| w[0] >= w[1]), "unsorted: {:?}", ts);
        }
    }

    #[test]
    fn test_evict_drops_number() {
        let mut reconciler = ContactReconciler::new();
        reconciler.replace_synced(N, vec![contact("1", 0)], vec![]);
        reconciler.replace_synced("n2", vec![contact("1", 0)], vec![]);
        assert!(reconciler.evict(N));
        assert!(reconciler.book(N).is_none());
        assert!(reconciler.book("n2").is_some());
        assert!(!reconciler.evict(N));
    }
}
