//! Per-number connection state machine
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`; a failure or an
//! explicit removal returns to `Disconnected` from any state. Every transition
//! is keyed by number id and never touches another number's entry.

use crate::whatsapp::events::{ConnectionEvent, ConnectionEventKind};
use crate::whatsapp::numbers::ConnectionStatus;
use crate::whatsapp::SessionError;
use std::collections::HashMap;

/// Lifecycle bookkeeping for one number
#[derive(Debug, Clone, Default)]
struct LinkState {
    status: ConnectionStatus,
    /// QR waiting to be scanned
    qr: Option<String>,
    /// A start-session call is in flight
    starting: bool,
    /// Epoch of the only device snapshot that may still be applied
    snapshot_epoch: u64,
}

/// Device snapshot fetch issued when a number becomes ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTicket {
    pub number_id: String,
    pub epoch: u64,
}

/// Result of feeding a connection event
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// QR stored, number is pairing
    QrIssued {
        from: ConnectionStatus,
    },
    /// Number became usable; fetch the device snapshot and open the sync prompt
    Ready {
        from: ConnectionStatus,
        snapshot: SnapshotTicket,
    },
    /// Number dropped back to disconnected
    Failed {
        from: ConnectionStatus,
        reason: Option<String>,
    },
}

/// Connection lifecycle for every tracked number
#[derive(Debug, Default)]
pub struct ConnectionLifecycle {
    links: HashMap<String, LinkState>,
    /// Last snapshot epoch handed out. Shared by all numbers and never reset,
    /// so a number that is removed and tracked again can't reissue an old one.
    last_epoch: u64,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a number, keeping existing state if already tracked.
    ///
    /// `seed` is the status the backend reported; it only applies to
    /// numbers seen for the first time.
    pub fn track(&mut self, number_id: &str, seed: ConnectionStatus) {
        self.links
            .entry(number_id.to_string())
            .or_insert_with(|| LinkState {
                status: seed,
                ..LinkState::default()
            });
    }

    fn next_epoch(&mut self) -> u64 {
        self.last_epoch += 1;
        self.last_epoch
    }

    pub fn is_tracked(&self, number_id: &str) -> bool {
        self.links.contains_key(number_id)
    }

    pub fn status(&self, number_id: &str) -> ConnectionStatus {
        self.links
            .get(number_id)
            .map(|l| l.status)
            .unwrap_or_default()
    }

    /// QR waiting to be scanned, if any
    pub fn qr(&self, number_id: &str) -> Option<&str> {
        self.links.get(number_id).and_then(|l| l.qr.as_deref())
    }

    pub fn is_starting(&self, number_id: &str) -> bool {
        self.links.get(number_id).is_some_and(|l| l.starting)
    }

    /// Mark a start-session call as issued.
    ///
    /// Returns `false` when the number is already connected or a start is
    /// already in flight, in which case no call should be made.
    pub fn begin_start(&mut self, number_id: &str) -> Result<bool, SessionError> {
        let link = self
            .links
            .get_mut(number_id)
            .ok_or_else(|| SessionError::UnknownNumber(number_id.to_string()))?;

        if link.status == ConnectionStatus::Connected || link.starting {
            tracing::debug!("Start for {} skipped ({:?})", number_id, link.status);
            return Ok(false);
        }

        link.starting = true;
        tracing::info!("Starting WhatsApp session for {}", number_id);
        Ok(true)
    }

    /// Start-session call succeeded; the QR arrives as a separate event
    pub fn start_succeeded(&mut self, number_id: &str) {
        if let Some(link) = self.links.get_mut(number_id) {
            link.starting = false;
        }
    }

    /// Start-session call failed; the number stays disconnected
    pub fn start_failed(&mut self, number_id: &str) {
        if let Some(link) = self.links.get_mut(number_id) {
            link.starting = false;
            link.qr = None;
            link.status = ConnectionStatus::Disconnected;
        }
    }

    /// Feed a connection event. Events for untracked numbers are dropped.
    pub fn apply(&mut self, event: &ConnectionEvent) -> Option<Transition> {
        match &event.kind {
            ConnectionEventKind::QrIssued(qr) => self.on_qr_issued(&event.number_id, qr),
            ConnectionEventKind::Ready => self.on_ready(&event.number_id),
            ConnectionEventKind::Failure(reason) => {
                self.on_failure(&event.number_id, reason.clone())
            }
        }
    }

    pub fn on_qr_issued(&mut self, number_id: &str, qr: &str) -> Option<Transition> {
        let link = self.links.get_mut(number_id)?;
        let from = link.status;
        link.qr = Some(qr.to_string());
        link.starting = false;
        link.status = ConnectionStatus::Connecting;
        tracing::info!("QR issued for {} ({:?} -> Connecting)", number_id, from);
        Some(Transition::QrIssued { from })
    }

    pub fn on_ready(&mut self, number_id: &str) -> Option<Transition> {
        if !self.is_tracked(number_id) {
            return None;
        }
        let epoch = self.next_epoch();
        let link = self.links.get_mut(number_id)?;
        let from = link.status;
        link.qr = None;
        link.starting = false;
        link.status = ConnectionStatus::Connected;
        link.snapshot_epoch = epoch;
        tracing::info!("WhatsApp ready for {} ({:?} -> Connected)", number_id, from);
        Some(Transition::Ready {
            from,
            snapshot: SnapshotTicket {
                number_id: number_id.to_string(),
                epoch: link.snapshot_epoch,
            },
        })
    }

    pub fn on_failure(&mut self, number_id: &str, reason: Option<String>) -> Option<Transition> {
        if !self.is_tracked(number_id) {
            return None;
        }
        let epoch = self.next_epoch();
        let link = self.links.get_mut(number_id)?;
        let from = link.status;
        link.qr = None;
        link.starting = false;
        link.status = ConnectionStatus::Disconnected;
        link.snapshot_epoch = epoch;
        tracing::warn!(
            "WhatsApp session for {} failed ({:?} -> Disconnected): {}",
            number_id,
            from,
            reason.as_deref().unwrap_or("no reason given")
        );
        Some(Transition::Failed { from, reason })
    }

    /// Whether a device snapshot for this ticket may still be applied
    pub fn accepts_snapshot(&self, ticket: &SnapshotTicket) -> bool {
        self.links.get(&ticket.number_id).is_some_and(|l| {
            l.status == ConnectionStatus::Connected && l.snapshot_epoch == ticket.epoch
        })
    }

    /// Issue a fresh snapshot ticket for a connected number
    pub fn refresh_snapshot(&mut self, number_id: &str) -> Option<SnapshotTicket> {
        if self.status(number_id) != ConnectionStatus::Connected {
            return None;
        }
        let epoch = self.next_epoch();
        let link = self.links.get_mut(number_id)?;
        link.snapshot_epoch = epoch;
        Some(SnapshotTicket {
            number_id: number_id.to_string(),
            epoch,
        })
    }

    /// Forget a number entirely; pending snapshots for it are discarded
    pub fn remove(&mut self, number_id: &str) -> ConnectionStatus {
        match self.links.remove(number_id) {
            Some(link) => {
                tracing::info!("Removed {} from lifecycle ({:?})", number_id, link.status);
                link.status
            }
            None => ConnectionStatus::Disconnected,
        }
    }

    /// Forget every number; the epoch counter keeps running
    pub fn clear(&mut self) {
        self.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle_with(numbers: &[&str]) -> ConnectionLifecycle {
        let mut lifecycle = ConnectionLifecycle::new();
        for n in numbers {
            lifecycle.track(n, ConnectionStatus::Disconnected);
        }
        lifecycle
    }

    #[test]
    fn test_full_pairing_cycle() {
        let mut lifecycle = lifecycle_with(&["n1"]);
        assert!(lifecycle.begin_start("n1").unwrap());
        assert!(lifecycle.is_starting("n1"));
        lifecycle.start_succeeded("n1");
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Disconnected);

        let t = lifecycle.on_qr_issued("n1", "qr-data").unwrap();
        assert_eq!(
            t,
            Transition::QrIssued {
                from: ConnectionStatus::Disconnected
            }
        );
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Connecting);
        assert_eq!(lifecycle.qr("n1"), Some("qr-data"));

        let Some(Transition::Ready { snapshot, .. }) = lifecycle.on_ready("n1") else {
            panic!("expected ready transition");
        };
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Connected);
        assert_eq!(lifecycle.qr("n1"), None);
        assert!(lifecycle.accepts_snapshot(&snapshot));
        assert!(!lifecycle.begin_start("n1").unwrap());
    }

    #[test]
    fn test_start_failure_stays_disconnected() {
        let mut lifecycle = lifecycle_with(&["n1"]);
        lifecycle.begin_start("n1").unwrap();
        lifecycle.start_failed("n1");
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Disconnected);
        assert!(!lifecycle.is_starting("n1"));
    }

    #[test]
    fn test_failure_discards_snapshot_in_flight() {
        let mut lifecycle = lifecycle_with(&["n1"]);
        lifecycle.on_qr_issued("n1", "qr");
        let Some(Transition::Ready { snapshot, .. }) = lifecycle.on_ready("n1") else {
            panic!("expected ready transition");
        };

        lifecycle.on_failure("n1", Some("logged out".into()));
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Disconnected);
        assert!(!lifecycle.accepts_snapshot(&snapshot));
    }

    #[test]
    fn test_events_are_scoped_by_number() {
        let mut lifecycle = lifecycle_with(&["n1", "n2"]);
        lifecycle.on_qr_issued("n1", "qr");
        lifecycle.on_ready("n2");
        lifecycle.on_failure("n2", None);

        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Connecting);
        assert_eq!(lifecycle.qr("n1"), Some("qr"));
        assert_eq!(lifecycle.status("n2"), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_seed_only_applies_once() {
        let mut lifecycle = ConnectionLifecycle::new();
        lifecycle.track("n1", ConnectionStatus::Connected);
        lifecycle.track("n1", ConnectionStatus::Disconnected);
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Connected);
        assert!(lifecycle.refresh_snapshot("n1").is_some());
    }

    #[test]
    fn test_untracked_number_is_ignored() {
        let mut lifecycle = ConnectionLifecycle::new();
        assert!(lifecycle.on_ready("ghost").is_none());
        assert!(matches!(
            lifecycle.begin_start("ghost"),
            Err(SessionError::UnknownNumber(_))
        ));
    }

    #[test]
    fn test_remove_drops_state_and_snapshot() {
        let mut lifecycle = lifecycle_with(&["n1"]);
        let Some(Transition::Ready { snapshot, .. }) = lifecycle.on_ready("n1") else {
            panic!("expected ready transition");
        };
        assert_eq!(lifecycle.remove("n1"), ConnectionStatus::Connected);
        assert!(!lifecycle.is_tracked("n1"));
        assert!(!lifecycle.accepts_snapshot(&snapshot));
        assert_eq!(lifecycle.status("n1"), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_retracked_number_never_reuses_epoch() {
        let mut lifecycle = lifecycle_with(&["n1"]);
        let Some(Transition::Ready { snapshot: before_remove, .. }) = lifecycle.on_ready("n1")
        else {
            panic!("expected ready transition");
        };
        lifecycle.remove("n1");
        lifecycle.track("n1", ConnectionStatus::Disconnected);
        let Some(Transition::Ready { snapshot: before_clear, .. }) = lifecycle.on_ready("n1")
        else {
            panic!("expected ready transition");
        };
        assert_ne!(before_remove, before_clear);
        assert!(!lifecycle.accepts_snapshot(&before_remove));

        lifecycle.clear();
        lifecycle.track("n1", ConnectionStatus::Disconnected);
        let Some(Transition::Ready { snapshot, .. }) = lifecycle.on_ready("n1") else {
            panic!("expected ready transition");
        };
        assert!(lifecycle.accepts_snapshot(&snapshot));
        assert!(!lifecycle.accepts_snapshot(&before_remove));
        assert!(!lifecycle.accepts_snapshot(&before_clear));
    }
}
