//! Headless dashboard: wires the backend, the realtime socket and the
//! dispatcher together and reacts to session notices

use crate::api::HttpBackend;
use crate::config::AppConfig;
use crate::realtime::SocketChannel;
use crate::whatsapp::dispatcher::{Input, RealtimeEventDispatcher, SessionHandle};
use crate::whatsapp::contacts::Contact;
use crate::whatsapp::numbers::ConnectionStatus;
use crate::whatsapp::reconciler::SyncFilter;
use crate::whatsapp::session::{Action, Notice, Session};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct DashboardApp {
    config: AppConfig,
    handle: SessionHandle,
    channel: SocketChannel,
    shutdown_tx: mpsc::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    /// `default_number` was already selected once
    default_selected: bool,
}

impl DashboardApp {
    /// Spawn the dispatcher and the realtime reader, then load the numbers.
    /// Must be called inside a tokio runtime.
    pub fn start(config: AppConfig) -> Result<(Self, mpsc::UnboundedReceiver<Notice>)> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);

        let (input_tx, input_rx) = mpsc::unbounded_channel::<Input>();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let (channel, reader_task) = SocketChannel::spawn(
            &config.realtime,
            config.backend.auth_token.clone(),
            input_tx.clone(),
        )?;

        let session = Session::new(chrono::Duration::seconds(
            config.manual_selection_hold_secs,
        ));
        let dispatcher = RealtimeEventDispatcher::new(
            session,
            backend,
            Arc::new(channel.clone()),
            input_tx,
            input_rx,
            notice_tx,
        );
        let handle = dispatcher.handle();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx));

        handle.send(Action::RefreshNumbers);
        tracing::info!("Dashboard started against {}", config.backend.base_url);

        Ok((
            Self {
                config,
                handle,
                channel,
                shutdown_tx,
                tasks: vec![dispatcher_task, reader_task],
                default_selected: false,
            },
            notice_rx,
        ))
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn handle_notice(&mut self, notice: &Notice) {
        match notice {
            Notice::NumbersChanged => {
                let numbers = self.handle.read(|s| {
                    s.numbers()
                        .iter()
                        .map(|n| format!("{} ({}, {:?})", n.name, n.id, n.connection_status))
                        .collect::<Vec<_>>()
                });
                tracing::info!("Numbers: [{}]", numbers.join(", "));
                self.select_default_number();
            }
            Notice::NumberStatus { number_id, status } => {
                tracing::info!("{} is {:?}", number_id, status);
            }
            Notice::QrReady {
                number_id,
                rendered,
                ..
            } => {
                tracing::info!("Scan the QR code with WhatsApp to link {}", number_id);
                match rendered {
                    Some(rendered) => println!("{}", rendered),
                    None => tracing::warn!("QR for {} can't be shown in a terminal", number_id),
                }
            }
            Notice::SyncPromptOpened { number_id } => {
                tracing::info!("{} is ready, device contacts are being loaded", number_id);
            }
            Notice::CollectionsChanged { number_id } => {
                let summary = self.handle.read(|s| {
                    s.book_for(number_id).map(|book| {
                        let view = book.sync_view(&SyncFilter::default());
                        (
                            book.contacts().len(),
                            book.groups().len(),
                            book.unsynced().len(),
                            view.personal.len() + view.groups.len(),
                        )
                    })
                });
                if let Some((contacts, groups, unsynced, candidates)) = summary {
                    tracing::debug!(
                        "{}: {} contacts, {} groups, {} unsynced, {} available to sync",
                        number_id,
                        contacts,
                        groups,
                        unsynced,
                        candidates
                    );
                }
            }
            Notice::SelectionChanged(selection) => match selection {
                Some(selection) => {
                    let label = self.handle.read(|s| {
                        s.book()
                            .and_then(|book| book.locate(&selection.chat_id))
                            .map(|(_, chat)| chat_label(chat))
                    });
                    tracing::info!(
                        "Open chat: {} ({:?}) {}",
                        selection.chat_id,
                        selection.chat_type,
                        label.as_deref().unwrap_or("not synced yet")
                    );
                }
                None => tracing::info!("No chat open"),
            },
            Notice::NumbersReset => {
                tracing::warn!("All numbers were reset by the backend");
                self.default_selected = false;
            }
            Notice::Error(error) => {
                tracing::error!("{}", error);
            }
        }
    }

    /// Select the configured number once it is known and start pairing it
    /// if it isn't connected
    fn select_default_number(&mut self) {
        if self.default_selected {
            return;
        }
        let Some(number_id) = self.config.default_number.clone() else {
            return;
        };
        let status = self.handle.read(|s| {
            if s.active_number().is_some() {
                return None;
            }
            s.number(&number_id).map(|n| n.connection_status)
        });
        let Some(status) = status else {
            return;
        };

        self.default_selected = true;
        tracing::info!("Selecting default number {}", number_id);
        self.handle.send(Action::SelectNumber(number_id.clone()));
        if status == ConnectionStatus::Disconnected {
            self.handle.send(Action::StartConnection(number_id));
        }
    }

    /// Stop the dispatcher and close the realtime socket
    pub async fn shutdown(self) {
        tracing::info!("Shutting down dashboard");
        if self.shutdown_tx.send(()).await.is_err() {
            tracing::debug!("Dispatcher already stopped");
        }
        self.channel.close().await;
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Name and last activity of a chat for log lines
fn chat_label(chat: &Contact) -> String {
    match chat.last_message_at() {
        Some(at) => format!("{}, last message {}", chat.display_name(), at.format("%Y-%m-%d %H:%M")),
        None => chat.display_name().to_string(),
    }
}
