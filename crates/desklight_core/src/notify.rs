//! Short-lived user-facing notifications.
//!
//! # Responsibility
//! - Hold transient messages until their display duration elapses.
//! - Expose one earliest deadline so a single timer can drive expiry.
//!
//! # Invariants
//! - Identifiers are strictly increasing for the queue lifetime.
//! - Every live notification has exactly one entry in the deadline index.
//! - Removal is keyed by identifier and idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

/// Display duration used when configuration does not override it.
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);

/// Longest display duration a queue accepts; larger values are clamped.
pub const MAX_NOTIFICATION_TTL: Duration = Duration::from_secs(86_400);

/// Locally generated notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationId(pub u64);

/// One transient message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub message: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

/// Delay queue of notifications keyed by expiry time.
#[derive(Debug)]
pub struct NotificationQueue {
    ttl: Duration,
    next_id: u64,
    entries: BTreeMap<NotificationId, Notification>,
    deadlines: BTreeSet<(Instant, NotificationId)>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_TTL)
    }
}

impl NotificationQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_NOTIFICATION_TTL),
            next_id: 1,
            entries: BTreeMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Appends a message created at `now` and schedules its removal.
    pub fn enqueue(&mut self, message: impl Into<String>, now: Instant) -> NotificationId {
        let id = NotificationId(self.next_id);
        self.next_id += 1;

        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        self.deadlines.insert((expires_at, id));
        self.entries.insert(
            id,
            Notification {
                id,
                message: message.into(),
                created_at: now,
                expires_at,
            },
        );
        id
    }

    /// Removes one notification. Returns `false` when it was already gone.
    pub fn remove(&mut self, id: NotificationId) -> bool {
        match self.entries.remove(&id) {
            Some(notification) => {
                self.deadlines.remove(&(notification.expires_at, id));
                true
            }
            None => false,
        }
    }

    /// Drops every notification whose deadline is at or before `now`.
    ///
    /// Returns the number of removed notifications.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            self.entries.remove(&id);
            removed += 1;
        }
        removed
    }

    /// Earliest pending deadline, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Live notifications in creation order.
    pub fn active(&self) -> impl Iterator<Item = &Notification> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
