//! Notification collaborator
//!
//! The engine pushes the rendered output of each session as a notification
//! and replaces it in place on every update. [`Notifier::push`] never
//! blocks: ids are allocated locally and delivery happens elsewhere.
//!
//! A notification id names a replacement chain. Pushing with
//! `replaces: Some(id)` updates that notification and returns the same id.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hpd_core::prelude::*;
use tokio::sync::mpsc;
use zbus::zvariant::Value;

use crate::config::{NotificationSettings, Urgency};

/// Identifier of a displayed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One notification push
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub app_name: String,
    pub summary: String,
    pub body: String,
    pub icon: String,
    pub urgency: Urgency,
    /// Notification to replace in place
    pub replaces: Option<NotificationId>,
    /// -1 for the server default
    pub timeout_ms: i32,
}

impl Notification {
    /// Build a notification using the configured presentation
    pub fn new(
        settings: &NotificationSettings,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            app_name: settings.app_name.clone(),
            summary: summary.into(),
            body: body.into(),
            icon: settings.icon.clone(),
            urgency: settings.urgency,
            replaces: None,
            timeout_ms: settings.timeout_ms,
        }
    }

    pub fn replacing(mut self, id: Option<NotificationId>) -> Self {
        self.replaces = id;
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }
}

/// Sink for notifications
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Show or replace a notification, returning its id
    fn push(&self, notification: Notification) -> Result<NotificationId>;
}

/// Allocates chain ids: the replaced id, or a fresh one
#[derive(Debug)]
struct IdAllocator(AtomicU64);

impl IdAllocator {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn assign(&self, replaces: Option<NotificationId>) -> NotificationId {
        replaces.unwrap_or_else(|| NotificationId(self.0.fetch_add(1, Ordering::Relaxed)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Log Notifier
// ─────────────────────────────────────────────────────────────────

/// Writes notifications to the diagnostic log
#[derive(Debug)]
pub struct LogNotifier {
    ids: IdAllocator,
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LogNotifier {
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
        }
    }
}

impl Notifier for LogNotifier {
    fn push(&self, notification: Notification) -> Result<NotificationId> {
        let id = self.ids.assign(notification.replaces);
        info!(
            "[{} {}] {}\n{}",
            notification.app_name, id, notification.summary, notification.body
        );
        Ok(id)
    }
}

// ─────────────────────────────────────────────────────────────────
// Desktop Notifier (org.freedesktop.Notifications)
// ─────────────────────────────────────────────────────────────────

#[zbus::proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    #[allow(clippy::too_many_arguments)]
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: &HashMap<&str, &Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}

type Queued = (NotificationId, Notification);

/// Relays notifications to the desktop notification server over the
/// session bus.
#[derive(Debug)]
pub struct DesktopNotifier {
    ids: IdAllocator,
    tx: mpsc::UnboundedSender<Queued>,
}

impl DesktopNotifier {
    /// Connect to the session bus and start the relay task
    pub async fn connect() -> Result<Self> {
        let connection = zbus::Connection::session()
            .await
            .map_err(|e| Error::notification(format!("No session bus: {}", e)))?;
        let proxy = NotificationsProxy::new(&connection)
            .await
            .map_err(|e| Error::notification(format!("No notification service: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(relay(proxy, rx));

        info!("Connected to org.freedesktop.Notifications");
        Ok(Self {
            ids: IdAllocator::new(),
            tx,
        })
    }
}

impl Notifier for DesktopNotifier {
    fn push(&self, notification: Notification) -> Result<NotificationId> {
        let id = self.ids.assign(notification.replaces);
        self.tx
            .send((id, notification))
            .map_err(|_| Error::notification("notification relay stopped"))?;
        Ok(id)
    }
}

/// Deliver queued notifications in order, mapping chain ids to server ids.
async fn relay(proxy: NotificationsProxy<'static>, mut rx: mpsc::UnboundedReceiver<Queued>) {
    let mut server_ids: HashMap<NotificationId, u32> = HashMap::new();

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        for (id, notification) in coalesce(batch) {
            let replaces_id = server_ids.get(&id).copied().unwrap_or(0);

            let urgency = Value::U8(notification.urgency.as_byte());
            let mut hints = HashMap::new();
            hints.insert("urgency", &urgency);

            match proxy
                .notify(
                    &notification.app_name,
                    replaces_id,
                    &notification.icon,
                    &notification.summary,
                    &notification.body,
                    &[],
                    &hints,
                    notification.timeout_ms,
                )
                .await
            {
                Ok(server_id) => {
                    server_ids.insert(id, server_id);
                }
                Err(e) => warn!("Notification {} failed: {}", id, e),
            }
        }
    }

    debug!("Notification relay stopped");
}

/// Keep only the newest update of each chain; chains keep the order of
/// their newest update.
fn coalesce(batch: Vec<Queued>) -> Vec<Queued> {
    let mut latest: Vec<Queued> = Vec::with_capacity(batch.len());
    for (id, notification) in batch {
        latest.retain(|(queued, _)| *queued != id);
        latest.push((id, notification));
    }
    latest
}
