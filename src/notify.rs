use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::observability;

const CHANNEL_CAPACITY: usize = 256;
/// How long a dedupe key suppresses repeats.
pub const DEDUPE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Expired keys are swept once this many are tracked.
const PRUNE_AT: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    /// To the guest who booked.
    ReservationConfirmed,
    /// To the venue owner.
    ReservationReceived,
    ReservationCancelled,
    ReservationRescheduled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ReservationConfirmed => "reservation-confirmed",
            NotificationKind::ReservationReceived => "owner-reservation-received",
            NotificationKind::ReservationCancelled => "reservation-cancelled",
            NotificationKind::ReservationRescheduled => "reservation-rescheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub dedupe_key: String,
    pub to_email: String,
    pub payload: serde_json::Value,
}

impl Notification {
    /// Keyed as `{kind}:{subject}`.
    pub fn new(
        kind: NotificationKind,
        subject: impl std::fmt::Display,
        to_email: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            dedupe_key: format!("{}:{subject}", kind.as_str()),
            kind,
            to_email: to_email.into(),
            payload,
        }
    }
}

/// Fire-and-forget outbox. Enqueueing never waits on delivery; a key that
/// was enqueued within the last [`DEDUPE_TTL`] is dropped.
pub struct NotificationQueue {
    seen: DashMap<String, Instant>,
    ttl: Duration,
    tx: broadcast::Sender<Notification>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::with_ttl(DEDUPE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Returns false when the dedupe key was seen within the TTL.
    pub fn enqueue(&self, notification: Notification) -> bool {
        let now = Instant::now();
        if self.seen.len() >= PRUNE_AT {
            self.prune_at(now);
        }
        let fresh = match self.seen.entry(notification.dedupe_key.clone()) {
            Entry::Occupied(mut e) if now.duration_since(*e.get()) >= self.ttl => {
                e.insert(now);
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(now);
                true
            }
        };
        if !fresh {
            debug!("duplicate notification dropped: {}", notification.dedupe_key);
            return false;
        }
        metrics::counter!(observability::NOTIFICATIONS_ENQUEUED_TOTAL, "kind" => notification.kind.as_str())
            .increment(1);
        // No subscriber is not an error.
        let _ = self.tx.send(notification);
        true
    }

    /// Forget expired keys. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        let removed = before.saturating_sub(self.seen.len());
        if removed > 0 {
            debug!("pruned {removed} notification keys");
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.seen.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

/// Drains the queue into the log. Delivery (email) lives outside this
/// process.
pub async fn run_dispatcher(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(n) => info!(kind = n.kind.as_str(), to = %n.to_email, key = %n.dedupe_key, "notification"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("notification dispatcher lagged, {skipped} dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
