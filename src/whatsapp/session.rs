//! Page-level session state
//!
//! [`Session`] is synchronous and does no I/O. User [`Action`]s, realtime
//! events (routed by the dispatcher) and finished REST calls
//! ([`Completion`]s) mutate it and return the [`Command`]s the driver must
//! execute next.
//!
//! Every fetch scoped to a number carries a [`FetchTicket`]. A response is
//! applied only while its number is still the active one and no newer
//! generation was issued since, so late answers for a number that was
//! switched away from or removed are dropped.

use crate::api::{ApiError, SyncedCollections};
use crate::whatsapp::contacts::{ChatKind, RawDeviceContact, UnsyncedContact};
use crate::whatsapp::events::{ChatHistoryUpdate, ConnectionEvent};
use crate::whatsapp::lifecycle::{ConnectionLifecycle, SnapshotTicket, Transition};
use crate::whatsapp::numbers::{ConnectionStatus, NumberSettings, WhatsAppNumber};
use crate::whatsapp::qr;
use crate::whatsapp::reconciler::{
    BulkOp, BulkScope, ContactBook, ContactReconciler, PendingBulk, PendingPromotion,
    PendingRemoval, PendingToggle, SyncFilter, SyncView,
};
use crate::whatsapp::selector::{ChatSelection, ChatSelector, Refresh, SelectionOrigin};
use crate::whatsapp::SessionError;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Stale-response guard for number-scoped fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub number_id: String,
    pub generation: u64,
}

/// Something the UI should know about
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NumbersChanged,
    NumberStatus {
        number_id: String,
        status: ConnectionStatus,
    },
    QrReady {
        number_id: String,
        qr: String,
        /// Terminal rendering, absent for image payloads
        rendered: Option<String>,
    },
    /// A number became ready; offer the "pick contacts to sync" prompt
    SyncPromptOpened { number_id: String },
    CollectionsChanged { number_id: String },
    SelectionChanged(Option<ChatSelection>),
    /// The backend dropped every session
    NumbersReset,
    Error(SessionError),
}

/// User intent
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RefreshNumbers,
    AddNumber {
        name: String,
        phone_number: String,
    },
    RemoveNumber(String),
    SelectNumber(String),
    DeselectNumber,
    StartConnection(String),
    UpdateNumberSettings {
        number_id: String,
        settings: NumberSettings,
    },
    /// Sync device contacts/groups of the active number
    Promote {
        contact_ids: Vec<String>,
        group_ids: Vec<String>,
    },
    /// Delete a synced or unsynced chat of the active number
    Remove(String),
    ToggleAgent {
        id: String,
        enabled: bool,
    },
    Bulk {
        op: BulkOp,
        scope: BulkScope,
    },
    SelectChat {
        id: String,
        kind: ChatKind,
    },
    ClearChat,
    RefreshDeviceContacts,
}

/// Work for the driver
#[derive(Debug)]
pub enum Command {
    JoinRoom(String),
    LeaveRoom(String),
    ListNumbers,
    CreateNumber {
        name: String,
        phone_number: String,
    },
    DeleteNumber(String),
    UpdateSettings {
        number_id: String,
        settings: NumberSettings,
        previous: NumberSettings,
    },
    StartSession(String),
    FetchDevice(SnapshotTicket),
    FetchSynced(FetchTicket),
    FetchUnsynced(FetchTicket),
    Promote(PendingPromotion),
    Remove(PendingRemoval),
    ToggleAgent(PendingToggle),
    Bulk(PendingBulk),
    Notify(Notice),
}

/// Finished REST call
#[derive(Debug)]
pub enum Completion {
    Numbers(Result<Vec<WhatsAppNumber>, ApiError>),
    NumberCreated(Result<WhatsAppNumber, ApiError>),
    NumberDeleted {
        number_id: String,
        result: Result<(), ApiError>,
    },
    SettingsUpdated {
        number_id: String,
        settings: NumberSettings,
        previous: NumberSettings,
        result: Result<(), ApiError>,
    },
    SessionStarted {
        number_id: String,
        result: Result<(), ApiError>,
    },
    Device {
        ticket: SnapshotTicket,
        result: Result<Vec<RawDeviceContact>, ApiError>,
    },
    Synced {
        ticket: FetchTicket,
        result: Result<SyncedCollections, ApiError>,
    },
    Unsynced {
        ticket: FetchTicket,
        result: Result<Vec<UnsyncedContact>, ApiError>,
    },
    Promoted {
        pending: PendingPromotion,
        result: Result<(), ApiError>,
    },
    Removed {
        pending: PendingRemoval,
        result: Result<(), ApiError>,
    },
    Toggled {
        pending: PendingToggle,
        result: Result<(), ApiError>,
    },
    Bulk {
        pending: PendingBulk,
        result: Result<(), ApiError>,
    },
}

fn notify(notice: Notice) -> Command {
    Command::Notify(notice)
}

fn fail(err: SessionError) -> Vec<Command> {
    tracing::warn!("{}", err);
    vec![notify(Notice::Error(err))]
}

/// Numbers, the active number and everything scoped to it
#[derive(Debug)]
pub struct Session {
    numbers: Vec<WhatsAppNumber>,
    active: Option<String>,
    generations: HashMap<String, u64>,
    lifecycle: ConnectionLifecycle,
    reconciler: ContactReconciler,
    selector: ChatSelector,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Duration::seconds(15))
    }
}

impl Session {
    /// `manual_hold` is how long a manual chat selection wins over messages
    /// from synced senders
    pub fn new(manual_hold: Duration) -> Self {
        Self {
            numbers: Vec::new(),
            active: None,
            generations: HashMap::new(),
            lifecycle: ConnectionLifecycle::new(),
            reconciler: ContactReconciler::new(),
            selector: ChatSelector::new(manual_hold),
        }
    }

    pub fn numbers(&self) -> &[WhatsAppNumber] {
        &self.numbers
    }

    pub fn number(&self, number_id: &str) -> Option<&WhatsAppNumber> {
        self.numbers.iter().find(|n| n.id == number_id)
    }

    pub fn active_number(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, number_id: &str) -> bool {
        self.active.as_deref() == Some(number_id)
    }

    pub fn status(&self, number_id: &str) -> ConnectionStatus {
        self.lifecycle.status(number_id)
    }

    pub fn qr(&self, number_id: &str) -> Option<&str> {
        self.lifecycle.qr(number_id)
    }

    /// Collections of the active number
    pub fn book(&self) -> Option<&ContactBook> {
        self.active
            .as_deref()
            .and_then(|number_id| self.reconciler.book(number_id))
    }

    pub fn book_for(&self, number_id: &str) -> Option<&ContactBook> {
        self.reconciler.book(number_id)
    }

    pub fn selection(&self) -> Option<&ChatSelection> {
        self.selector.selection()
    }

    /// "Choose what to sync" view of the active number
    pub fn sync_view(&self, filter: &SyncFilter) -> Option<SyncView<'_>> {
        self.book().map(|book| book.sync_view(filter))
    }

    /// Whether a fetch response may still be applied
    pub fn accepts(&self, ticket: &FetchTicket) -> bool {
        self.is_active(&ticket.number_id) && self.generation(&ticket.number_id) == ticket.generation
    }

    fn generation(&self, number_id: &str) -> u64 {
        self.generations.get(number_id).copied().unwrap_or_default()
    }

    fn bump_generation(&mut self, number_id: &str) {
        *self.generations.entry(number_id.to_string()).or_default() += 1;
    }

    fn ticket(&self, number_id: &str) -> FetchTicket {
        FetchTicket {
            number_id: number_id.to_string(),
            generation: self.generation(number_id),
        }
    }

    fn require_active(&self) -> Result<String, SessionError> {
        self.active.clone().ok_or(SessionError::NoActiveNumber)
    }

    pub fn handle_action(&mut self, action: Action, now: DateTime<Utc>) -> Vec<Command> {
        tracing::debug!("Action: {:?}", action);
        let result = match action {
            Action::RefreshNumbers => Ok(vec![Command::ListNumbers]),
            Action::AddNumber { name, phone_number } => Ok(vec![Command::CreateNumber {
                name: name.trim().to_string(),
                phone_number: phone_number.trim().to_string(),
            }]),
            Action::RemoveNumber(number_id) => self.remove_number(number_id),
            Action::SelectNumber(number_id) => self.select_number(number_id),
            Action::DeselectNumber => Ok(self.deactivate()),
            Action::StartConnection(number_id) => self.start_connection(number_id),
            Action::UpdateNumberSettings {
                number_id,
                settings,
            } => self.update_settings(number_id, settings),
            Action::Promote {
                contact_ids,
                group_ids,
            } => self.promote(&contact_ids, &group_ids),
            Action::Remove(id) => self.remove_chat(&id),
            Action::ToggleAgent { id, enabled } => self.toggle_agent(&id, enabled),
            Action::Bulk { op, scope } => self.bulk(op, scope),
            Action::SelectChat { id, kind } => self.select_chat(&id, kind, now),
            Action::ClearChat => Ok(self.clear_chat()),
            Action::RefreshDeviceContacts => self.refresh_device_contacts(),
        };
        result.unwrap_or_else(fail)
    }

    fn remove_number(&mut self, number_id: String) -> Result<Vec<Command>, SessionError> {
        if self.number(&number_id).is_none() && !self.lifecycle.is_tracked(&number_id) {
            return Err(SessionError::UnknownNumber(number_id));
        }
        let mut commands = self.forget_number(&number_id);
        commands.push(Command::DeleteNumber(number_id));
        commands.push(notify(Notice::NumbersChanged));
        Ok(commands)
    }

    /// Drop everything scoped to a number and invalidate its fetches
    fn forget_number(&mut self, number_id: &str) -> Vec<Command> {
        let commands = if self.is_active(number_id) {
            self.deactivate()
        } else {
            self.bump_generation(number_id);
            Vec::new()
        };
        self.lifecycle.remove(number_id);
        self.reconciler.evict(number_id);
        self.numbers.retain(|n| n.id != number_id);
        commands
    }

    fn select_number(&mut self, number_id: String) -> Result<Vec<Command>, SessionError> {
        if self.number(&number_id).is_none() {
            return Err(SessionError::UnknownNumber(number_id));
        }

        let mut commands = Vec::new();
        if !self.is_active(&number_id) {
            // previous room must be left before the new one is joined
            commands.extend(self.deactivate());
            tracing::info!("Selected number {}", number_id);
            self.reconciler.open(&number_id);
            self.active = Some(number_id.clone());
            commands.push(Command::JoinRoom(number_id.clone()));
        }

        let ticket = self.ticket(&number_id);
        commands.push(Command::FetchSynced(ticket.clone()));
        commands.push(Command::FetchUnsynced(ticket));
        Ok(commands)
    }

    fn deactivate(&mut self) -> Vec<Command> {
        let Some(previous) = self.active.take() else {
            return Vec::new();
        };
        tracing::info!("Deselected number {}", previous);
        self.bump_generation(&previous);
        let mut commands = vec![Command::LeaveRoom(previous)];
        if self.selector.clear() {
            commands.push(notify(Notice::SelectionChanged(None)));
        }
        commands
    }

    fn start_connection(&mut self, number_id: String) -> Result<Vec<Command>, SessionError> {
        if self.lifecycle.begin_start(&number_id)? {
            Ok(vec![Command::StartSession(number_id)])
        } else {
            Ok(Vec::new())
        }
    }

    fn update_settings(
        &mut self,
        number_id: String,
        settings: NumberSettings,
    ) -> Result<Vec<Command>, SessionError> {
        let number = self
            .numbers
            .iter_mut()
            .find(|n| n.id == number_id)
            .ok_or_else(|| SessionError::UnknownNumber(number_id.clone()))?;
        if number.settings == settings {
            return Ok(Vec::new());
        }
        let previous = std::mem::replace(&mut number.settings, settings);
        Ok(vec![
            Command::UpdateSettings {
                number_id,
                settings,
                previous,
            },
            notify(Notice::NumbersChanged),
        ])
    }

    fn promote(
        &mut self,
        contact_ids: &[String],
        group_ids: &[String],
    ) -> Result<Vec<Command>, SessionError> {
        let number_id = self.require_active()?;
        let pending = self
            .reconciler
            .begin_promotion(&number_id, contact_ids, group_ids)?;
        tracing::info!(
            "Syncing {} contacts and {} groups for {}",
            pending.contacts.len(),
            pending.groups.len(),
            number_id
        );
        Ok(vec![Command::Promote(pending)])
    }

    fn remove_chat(&mut self, id: &str) -> Result<Vec<Command>, SessionError> {
        let number_id = self.require_active()?;
        let pending = self.reconciler.apply_remove(&number_id, id)?;
        let mut commands = vec![Command::Remove(pending)];
        commands.extend(self.after_mutation(&number_id));
        Ok(commands)
    }

    fn toggle_agent(&mut self, id: &str, enabled: bool) -> Result<Vec<Command>, SessionError> {
        let number_id = self.require_active()?;
        let pending = self.reconciler.apply_toggle(&number_id, id, enabled)?;
        Ok(vec![
            Command::ToggleAgent(pending),
            notify(Notice::CollectionsChanged { number_id }),
        ])
    }

    fn bulk(&mut self, op: BulkOp, scope: BulkScope) -> Result<Vec<Command>, SessionError> {
        let number_id = self.require_active()?;
        let pending = self.reconciler.apply_bulk(&number_id, op, scope)?;
        if pending.is_empty() {
            tracing::debug!("Bulk {:?} on {} has nothing to do", op, number_id);
            return Ok(Vec::new());
        }
        let mut commands = vec![Command::Bulk(pending)];
        commands.extend(self.after_mutation(&number_id));
        Ok(commands)
    }

    fn select_chat(
        &mut self,
        id: &str,
        kind: ChatKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<Command>, SessionError> {
        let number_id = self.require_active()?;
        let selection = self
            .selector
            .select(
                self.reconciler.book(&number_id),
                id,
                kind,
                SelectionOrigin::Manual,
                now,
            )
            .clone();
        Ok(vec![notify(Notice::SelectionChanged(Some(selection)))])
    }

    fn clear_chat(&mut self) -> Vec<Command> {
        if self.selector.clear() {
            vec![notify(Notice::SelectionChanged(None))]
        } else {
            Vec::new()
        }
    }

    fn refresh_device_contacts(&mut self) -> Result<Vec<Command>, SessionError> {
        let number_id = self.require_active()?;
        match self.lifecycle.refresh_snapshot(&number_id) {
            Some(ticket) => Ok(vec![Command::FetchDevice(ticket)]),
            None => {
                tracing::warn!("{} is not connected, no device contacts to fetch", number_id);
                Ok(Vec::new())
            }
        }
    }

    /// Collections changed locally: tell the UI and re-check the selection
    fn after_mutation(&mut self, number_id: &str) -> Vec<Command> {
        let mut commands = vec![notify(Notice::CollectionsChanged {
            number_id: number_id.to_string(),
        })];
        if self.is_active(number_id) && self.selector.enforce(self.reconciler.book(number_id)) {
            commands.push(notify(Notice::SelectionChanged(None)));
        }
        commands
    }

    fn after_refresh(&mut self, number_id: &str, refresh: Refresh) -> Vec<Command> {
        let mut commands = vec![notify(Notice::CollectionsChanged {
            number_id: number_id.to_string(),
        })];
        if self
            .selector
            .on_refreshed(self.reconciler.book(number_id), refresh)
        {
            commands.push(notify(Notice::SelectionChanged(
                self.selector.selection().cloned(),
            )));
        }
        commands
    }

    /// Copy the lifecycle status onto the number record
    fn sync_status(&mut self, number_id: &str) -> Option<Command> {
        let status = self.lifecycle.status(number_id);
        let number = self.numbers.iter_mut().find(|n| n.id == number_id)?;
        number.connection_status = status;
        Some(notify(Notice::NumberStatus {
            number_id: number_id.to_string(),
            status,
        }))
    }

    pub fn handle_completion(&mut self, completion: Completion) -> Vec<Command> {
        match completion {
            Completion::Numbers(Ok(numbers)) => self.replace_numbers(numbers),
            Completion::Numbers(Err(err)) => fail(err.into()),

            Completion::NumberCreated(Ok(number)) => {
                tracing::info!("Created number {} ({})", number.id, number.phone_number);
                self.upsert_number(number);
                vec![notify(Notice::NumbersChanged)]
            }
            Completion::NumberCreated(Err(err)) => fail(err.into()),

            Completion::NumberDeleted { number_id, result } => match result {
                Ok(()) => {
                    tracing::info!("Deleted number {}", number_id);
                    Vec::new()
                }
                Err(err) => {
                    // local removal already happened; reload to restore it
                    let mut commands = fail(err.into());
                    commands.push(Command::ListNumbers);
                    commands
                }
            },

            Completion::SettingsUpdated {
                number_id,
                settings,
                previous,
                result,
            } => match result {
                Ok(()) => Vec::new(),
                Err(err) => {
                    if let Some(number) = self
                        .numbers
                        .iter_mut()
                        .find(|n| n.id == number_id && n.settings == settings)
                    {
                        tracing::warn!("Reverting settings of {}", number_id);
                        number.settings = previous;
                    }
                    let mut commands = fail(err.into());
                    commands.push(notify(Notice::NumbersChanged));
                    commands
                }
            },

            Completion::SessionStarted { number_id, result } => match result {
                Ok(()) => {
                    self.lifecycle.start_succeeded(&number_id);
                    Vec::new()
                }
                Err(err) => {
                    self.lifecycle.start_failed(&number_id);
                    let mut commands: Vec<Command> =
                        self.sync_status(&number_id).into_iter().collect();
                    commands.extend(fail(err.into()));
                    commands
                }
            },

            Completion::Device { ticket, result } => {
                if !self.lifecycle.accepts_snapshot(&ticket) {
                    let stale = SessionError::StaleReference(ticket.number_id.clone());
                    tracing::debug!("Dropping device snapshot (epoch {}): {}", ticket.epoch, stale);
                    return Vec::new();
                }
                match result {
                    Ok(raw) => {
                        self.reconciler.replace_device_snapshot(&ticket.number_id, raw);
                        vec![notify(Notice::CollectionsChanged {
                            number_id: ticket.number_id,
                        })]
                    }
                    Err(err) => fail(err.into()),
                }
            }

            Completion::Synced { ticket, result } => {
                if !self.accepts(&ticket) {
                    let stale = SessionError::StaleReference(ticket.number_id.clone());
                    tracing::debug!("Dropping synced collections (generation {}): {}", ticket.generation, stale);
                    return Vec::new();
                }
                match result {
                    Ok(SyncedCollections { contacts, groups }) => {
                        self.reconciler
                            .replace_synced(&ticket.number_id, contacts, groups);
                        self.after_refresh(&ticket.number_id, Refresh::Synced)
                    }
                    Err(err) => fail(err.into()),
                }
            }

            Completion::Unsynced { ticket, result } => {
                if !self.accepts(&ticket) {
                    let stale = SessionError::StaleReference(ticket.number_id.clone());
                    tracing::debug!("Dropping unsynced collection (generation {}): {}", ticket.generation, stale);
                    return Vec::new();
                }
                match result {
                    Ok(unsynced) => {
                        self.reconciler.replace_unsynced(&ticket.number_id, unsynced);
                        self.after_refresh(&ticket.number_id, Refresh::Unsynced)
                    }
                    Err(err) => fail(err.into()),
                }
            }

            Completion::Promoted { pending, result } => {
                let number_id = pending.number_id.clone();
                if let Err(err) = result {
                    // nothing was applied locally
                    return fail(err.into());
                }
                if self.reconciler.book(&number_id).is_none() {
                    tracing::debug!("Dropping promotion for removed number {}", number_id);
                    return Vec::new();
                }
                match self.reconciler.commit_promotion(pending) {
                    Ok(_) => self.after_mutation(&number_id),
                    Err(err) => fail(err),
                }
            }

            Completion::Removed { pending, result } => {
                let number_id = pending.number_id.clone();
                match result {
                    Ok(()) => {
                        self.reconciler.settle_remove(pending, true);
                        Vec::new()
                    }
                    Err(err) => {
                        self.reconciler.settle_remove(pending, false);
                        let mut commands = fail(err.into());
                        commands.extend(self.after_mutation(&number_id));
                        commands
                    }
                }
            }

            Completion::Toggled { pending, result } => {
                let number_id = pending.number_id.clone();
                match result {
                    Ok(()) => {
                        self.reconciler.settle_toggle(pending, true);
                        Vec::new()
                    }
                    Err(err) => {
                        let mut commands = fail(err.into());
                        if self.reconciler.settle_toggle(pending, false) {
                            commands.push(notify(Notice::CollectionsChanged { number_id }));
                        }
                        commands
                    }
                }
            }

            Completion::Bulk { pending, result } => {
                let number_id = pending.number_id.clone();
                match result {
                    Ok(()) => {
                        self.reconciler.settle_bulk(pending, true);
                        Vec::new()
                    }
                    Err(err) => {
                        self.reconciler.settle_bulk(pending, false);
                        let mut commands = fail(err.into());
                        commands.extend(self.after_mutation(&number_id));
                        // local view is not trusted after a failed batch
                        if self.is_active(&number_id) {
                            commands.push(Command::FetchSynced(self.ticket(&number_id)));
                        }
                        commands
                    }
                }
            }
        }
    }

    fn replace_numbers(&mut self, incoming: Vec<WhatsAppNumber>) -> Vec<Command> {
        let mut seen = HashSet::new();
        let incoming: Vec<WhatsAppNumber> = incoming
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();

        let gone: Vec<String> = self
            .numbers
            .iter()
            .filter(|n| !seen.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();

        let mut commands = Vec::new();
        for number_id in gone {
            tracing::info!("Number {} no longer exists", number_id);
            commands.extend(self.forget_number(&number_id));
        }

        let mut numbers = Vec::with_capacity(incoming.len());
        for mut number in incoming {
            self.lifecycle.track(&number.id, number.connection_status);
            number.connection_status = self.lifecycle.status(&number.id);
            numbers.push(number);
        }
        tracing::info!("Loaded {} numbers", numbers.len());
        self.numbers = numbers;

        commands.push(notify(Notice::NumbersChanged));
        commands
    }

    fn upsert_number(&mut self, mut number: WhatsAppNumber) {
        self.lifecycle.track(&number.id, number.connection_status);
        number.connection_status = self.lifecycle.status(&number.id);
        match self.numbers.iter_mut().find(|n| n.id == number.id) {
            Some(existing) => *existing = number,
            None => self.numbers.push(number),
        }
    }

    /// Feed a QR, ready or failure event to the lifecycle
    pub fn on_connection_event(&mut self, event: &ConnectionEvent) -> Vec<Command> {
        let Some(transition) = self.lifecycle.apply(event) else {
            tracing::debug!(
                "Dropping connection event for untracked number {}",
                event.number_id
            );
            return Vec::new();
        };

        let number_id = event.number_id.clone();
        let mut commands: Vec<Command> = self.sync_status(&number_id).into_iter().collect();
        match transition {
            Transition::QrIssued { .. } => {
                if let Some(code) = self.lifecycle.qr(&number_id) {
                    commands.push(notify(Notice::QrReady {
                        rendered: qr::render_terminal(code),
                        qr: code.to_string(),
                        number_id,
                    }));
                }
            }
            Transition::Ready { snapshot, .. } => {
                commands.push(Command::FetchDevice(snapshot));
                commands.push(notify(Notice::SyncPromptOpened { number_id }));
            }
            Transition::Failed { .. } => {}
        }
        commands
    }

    /// Backend lost every session: drop all numbers and reload them
    pub fn reset_all(&mut self) -> Vec<Command> {
        tracing::warn!("Backend invalidated all numbers, resetting session state");
        let mut commands = self.deactivate();
        for generation in self.generations.values_mut() {
            *generation += 1;
        }
        self.numbers.clear();
        self.lifecycle.clear();
        self.reconciler.clear();
        commands.push(notify(Notice::NumbersReset));
        commands.push(notify(Notice::NumbersChanged));
        commands.push(Command::ListNumbers);
        commands
    }

    /// Inbound message on the active number
    pub fn on_chat_history(&mut self, update: &ChatHistoryUpdate, now: DateTime<Utc>) -> Vec<Command> {
        let Some(number_id) = self.active.clone() else {
            tracing::debug!("Dropping chat-history for {}, no active number", update.to);
            return Vec::new();
        };

        let synced = self
            .reconciler
            .book(&number_id)
            .is_some_and(|book| book.is_synced(&update.to));

        let mut commands = Vec::new();
        if self
            .reconciler
            .record_message(
                &number_id,
                &update.to,
                update.last_message_timestamp,
                update.preview.as_deref(),
            )
            .is_some()
        {
            commands.push(notify(Notice::CollectionsChanged {
                number_id: number_id.clone(),
            }));
        }

        if synced {
            if !self.selector.can_auto_select(now) {
                tracing::debug!("Keeping manual selection over message from {}", update.to);
                return commands;
            }
        } else {
            // new senders always surface
            commands.push(Command::FetchUnsynced(self.ticket(&number_id)));
        }

        let selection = self
            .selector
            .select(
                self.reconciler.book(&number_id),
                &update.to,
                ChatKind::of(&update.to),
                SelectionOrigin::Incoming,
                now,
            )
            .clone();
        commands.push(notify(Notice::SelectionChanged(Some(selection))));
        commands
    }

    /// `target` is the number named by the event, when it names one
    pub fn on_unsynced_updated(&mut self, target: Option<&str>) -> Vec<Command> {
        match self.refresh_target(target) {
            Some(ticket) => vec![Command::FetchUnsynced(ticket)],
            None => Vec::new(),
        }
    }

    pub fn on_synced_updated(&mut self) -> Vec<Command> {
        match self.refresh_target(None) {
            Some(ticket) => vec![Command::FetchSynced(ticket)],
            None => Vec::new(),
        }
    }

    fn refresh_target(&self, target: Option<&str>) -> Option<FetchTicket> {
        let active = self.active.as_deref()?;
        if let Some(target) = target {
            if target != active {
                tracing::debug!("Dropping collection update for inactive number {}", target);
                return None;
            }
        }
        Some(self.ticket(active))
    }
}
