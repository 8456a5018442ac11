//! Realtime event dispatcher
//!
//! One task owns the only write path into the [`Session`]. User actions,
//! realtime events and REST completions all arrive on a single FIFO queue
//! and are handled one at a time; each handler finishes mutating state
//! before the next input is taken. REST calls run as spawned tasks that
//! post their [`Completion`] back into the same queue, while room
//! join/leave is awaited in order so the previous room is always left
//! before the next one is joined.

use crate::api::BackendApi;
use crate::realtime::RealtimeChannel;
use crate::whatsapp::events::{ConnectionEventKind, RealtimeEvent};
use crate::whatsapp::reconciler::BulkOp;
use crate::whatsapp::session::{Action, Command, Completion, Notice, Session};
use crate::whatsapp::SessionError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything the dispatcher consumes
#[derive(Debug)]
pub enum Input {
    Action(Action),
    Event(RealtimeEvent),
    Completed(Completion),
}

impl From<RealtimeEvent> for Input {
    fn from(event: RealtimeEvent) -> Self {
        Input::Event(event)
    }
}

impl From<Action> for Input {
    fn from(action: Action) -> Self {
        Input::Action(action)
    }
}

/// Route a realtime event into the session
pub fn route(session: &mut Session, event: RealtimeEvent, now: DateTime<Utc>) -> Vec<Command> {
    if let Some(connection) = event.connection_event() {
        if matches!(connection.kind, ConnectionEventKind::QrIssued(_))
            && !session.is_active(&connection.number_id)
        {
            let stale = SessionError::StaleReference(connection.number_id);
            tracing::debug!("Dropping QR: {}", stale);
            return Vec::new();
        }
        return session.on_connection_event(&connection);
    }

    match event {
        RealtimeEvent::NumbersInvalidated => session.reset_all(),
        RealtimeEvent::ChatHistory(update) => session.on_chat_history(&update, now),
        RealtimeEvent::UnsyncedUpdated { number_id } => {
            session.on_unsynced_updated(number_id.as_deref())
        }
        RealtimeEvent::SyncedUpdated => session.on_synced_updated(),
        RealtimeEvent::QrIssued { .. }
        | RealtimeEvent::Ready { .. }
        | RealtimeEvent::Disconnected { .. } => Vec::new(),
    }
}

/// Cloneable handle for sending actions and reading session state
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::UnboundedSender<Input>,
    state: Arc<RwLock<Session>>,
}

impl SessionHandle {
    /// Queue an action. Returns `false` once the dispatcher has stopped.
    pub fn send(&self, action: Action) -> bool {
        self.sender.send(Input::Action(action)).is_ok()
    }

    /// Read session state; the closure must not block
    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.state.read())
    }
}

pub struct RealtimeEventDispatcher {
    session: Arc<RwLock<Session>>,
    backend: Arc<dyn BackendApi>,
    channel: Arc<dyn RealtimeChannel>,
    sender: mpsc::UnboundedSender<Input>,
    inputs: mpsc::UnboundedReceiver<Input>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl RealtimeEventDispatcher {
    /// `sender` must feed `inputs`; realtime transports get clones of it
    pub fn new(
        session: Session,
        backend: Arc<dyn BackendApi>,
        channel: Arc<dyn RealtimeChannel>,
        sender: mpsc::UnboundedSender<Input>,
        inputs: mpsc::UnboundedReceiver<Input>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
            backend,
            channel,
            sender,
            inputs,
            notices,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            sender: self.sender.clone(),
            state: self.session.clone(),
        }
    }

    /// Process inputs until shutdown is signalled
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) {
        tracing::info!("Realtime event dispatcher started");
        loop {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(input) => self.step(input).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Realtime event dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Handle a single input and execute the resulting commands
    pub async fn step(&mut self, input: Input) {
        let now = Utc::now();
        let commands = {
            let mut session = self.session.write();
            match input {
                Input::Action(action) => session.handle_action(action, now),
                Input::Event(event) => route(&mut session, event, now),
                Input::Completed(completion) => session.handle_completion(completion),
            }
        };

        for command in commands {
            self.execute(command).await;
        }
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::JoinRoom(number_id) => {
                if let Err(e) = self.channel.join_room(&number_id).await {
                    tracing::warn!("Failed to join room {}: {}", number_id, e);
                    self.publish(Notice::Error(e.into()));
                }
            }
            Command::LeaveRoom(number_id) => {
                if let Err(e) = self.channel.leave_room(&number_id).await {
                    tracing::warn!("Failed to leave room {}: {}", number_id, e);
                    self.publish(Notice::Error(e.into()));
                }
            }
            Command::Notify(notice) => self.publish(notice),

            Command::ListNumbers => self.spawn(|backend| async move {
                Completion::Numbers(backend.list_numbers().await)
            }),
            Command::CreateNumber { name, phone_number } => self.spawn(|backend| async move {
                Completion::NumberCreated(backend.create_number(&name, &phone_number).await)
            }),
            Command::DeleteNumber(number_id) => self.spawn(|backend| async move {
                let result = backend.delete_number(&number_id).await;
                Completion::NumberDeleted { number_id, result }
            }),
            Command::UpdateSettings {
                number_id,
                settings,
                previous,
            } => self.spawn(move |backend| async move {
                let result = backend.update_number_settings(&number_id, settings).await;
                Completion::SettingsUpdated {
                    number_id,
                    settings,
                    previous,
                    result,
                }
            }),
            Command::StartSession(number_id) => self.spawn(|backend| async move {
                let result = backend.start_session(&number_id).await;
                Completion::SessionStarted { number_id, result }
            }),
            Command::FetchDevice(ticket) => self.spawn(|backend| async move {
                let result = backend.fetch_device_contacts(&ticket.number_id).await;
                Completion::Device { ticket, result }
            }),
            Command::FetchSynced(ticket) => self.spawn(|backend| async move {
                let result = backend.fetch_synced(&ticket.number_id).await;
                Completion::Synced { ticket, result }
            }),
            Command::FetchUnsynced(ticket) => self.spawn(|backend| async move {
                let result = backend.fetch_unsynced(&ticket.number_id).await;
                Completion::Unsynced { ticket, result }
            }),
            Command::Promote(pending) => self.spawn(|backend| async move {
                let contact_ids = pending.contact_ids();
                let group_ids = pending.group_ids();
                let result = backend
                    .promote(&pending.number_id, &contact_ids, &group_ids)
                    .await;
                Completion::Promoted { pending, result }
            }),
            Command::Remove(pending) => self.spawn(|backend| async move {
                let result = backend
                    .remove_chat(&pending.number_id, pending.row_id(), pending.collection)
                    .await;
                Completion::Removed { pending, result }
            }),
            Command::ToggleAgent(pending) => self.spawn(|backend| async move {
                let result = backend
                    .toggle_agent(&pending.number_id, &pending.row_id, pending.value)
                    .await;
                Completion::Toggled { pending, result }
            }),
            Command::Bulk(pending) => self.spawn(|backend| async move {
                let result = match pending.op {
                    BulkOp::DeleteAll => {
                        backend
                            .bulk_delete(&pending.number_id, &pending.row_ids())
                            .await
                    }
                    BulkOp::EnableAll | BulkOp::DisableAll => {
                        backend
                            .bulk_toggle_agent(&pending.number_id, &pending.updates())
                            .await
                    }
                };
                Completion::Bulk { pending, result }
            }),
        }
    }

    /// Run a REST call in the background and queue its completion
    fn spawn<F, Fut>(&self, call: F)
    where
        F: FnOnce(Arc<dyn BackendApi>) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let task = call(self.backend.clone());
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let completion = task.await;
            if sender.send(Input::Completed(completion)).is_err() {
                tracing::debug!("Dispatcher stopped, dropping completion");
            }
        });
    }

    fn publish(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            tracing::debug!("No notice listener");
        }
    }
}
