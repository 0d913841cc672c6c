//! Push notification display hook
//!
//! A push message becomes a notification with a fixed title, icon, badge,
//! vibration pattern and action set; only the body comes from the payload.
//! Clicking the `explore` action opens the application in a client window,
//! anything else just dismisses the notification.

use crate::offline_cache::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Action that opens the application window
pub const ACTION_EXPLORE: &str = "explore";
/// Action that only dismisses the notification
pub const ACTION_CLOSE: &str = "close";

/// Fixed notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// URL opened by the `explore` action
    pub open_url: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            title: "Operations".to_string(),
            default_body: "New notification".to_string(),
            icon: "/favicon.ico".to_string(),
            badge: "/favicon.ico".to_string(),
            vibrate: vec![100, 50, 100],
            open_url: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub id: Uuid,
    pub date_of_arrival: DateTime<Utc>,
}

/// A notification ready to be displayed by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// What a notification click resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "url", rename_all = "snake_case")]
pub enum ClickOutcome {
    OpenWindow(String),
    Dismissed,
}

/// Host surface for displaying notifications and client windows
#[async_trait::async_trait]
pub trait NotificationHost: Send + Sync {
    async fn show_notification(&self, notification: &Notification) -> Result<(), CacheError>;

    async fn close_notification(&self, id: Uuid) -> Result<(), CacheError>;

    /// Open a client window at `url`, or focus one already showing it
    async fn open_window(&self, url: &str) -> Result<(), CacheError>;
}

/// Build the notification for a push payload
pub fn build_notification(payload: Option<&str>, config: &PushConfig) -> Notification {
    // A present payload wins even when empty
    let body = match payload {
        Some(text) => text.to_string(),
        None => config.default_body.clone(),
    };

    Notification {
        title: config.title.clone(),
        body,
        icon: config.icon.clone(),
        badge: config.badge.clone(),
        vibrate: config.vibrate.clone(),
        data: NotificationData {
            id: Uuid::new_v4(),
            date_of_arrival: Utc::now(),
        },
        actions: vec![
            NotificationAction {
                action: ACTION_EXPLORE.to_string(),
                title: "View".to_string(),
                icon: config.icon.clone(),
            },
            NotificationAction {
                action: ACTION_CLOSE.to_string(),
                title: "Close".to_string(),
                icon: config.icon.clone(),
            },
        ],
    }
}

pub fn resolve_click(action: Option<&str>, config: &PushConfig) -> ClickOutcome {
    match action {
        Some(ACTION_EXPLORE) => ClickOutcome::OpenWindow(config.open_url.clone()),
        _ => ClickOutcome::Dismissed,
    }
}

/// Display a notification for an incoming push message
pub async fn handle_push(
    payload: Option<&str>,
    config: &PushConfig,
    host: &dyn NotificationHost,
) -> Result<Notification, CacheError> {
    info!("🔔 Push message received");
    let notification = build_notification(payload, config);
    host.show_notification(&notification).await?;
    Ok(notification)
}

/// Close the clicked notification and open the app for `explore`
pub async fn handle_notification_click(
    id: Uuid,
    action: Option<&str>,
    config: &PushConfig,
    host: &dyn NotificationHost,
) -> Result<ClickOutcome, CacheError> {
    debug!("Notification {} clicked (action={:?})", id, action);
    host.close_notification(id).await?;

    let outcome = resolve_click(action, config);
    if let ClickOutcome::OpenWindow(url) = &outcome {
        host.open_window(url).await?;
    }
    Ok(outcome)
}

/// Something the host was asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    Show { notification: Notification },
    Close { id: Uuid },
    OpenWindow { url: String },
}

/// Events kept before the oldest are dropped
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// In-process NotificationHost that queues events for clients to collect
///
/// The queue is bounded; once full, each new event evicts the oldest.
#[derive(Debug)]
pub struct NotificationOutbox {
    events: Mutex<VecDeque<HostEvent>>,
    capacity: usize,
}

impl Default for NotificationOutbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl NotificationOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, event: HostEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            events.pop_front();
            warn!("Notification outbox full ({}), dropped oldest event", self.capacity);
        }
        events.push_back(event);
    }

    /// Take every queued event, oldest first
    pub fn drain(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationHost for NotificationOutbox {
    async fn show_notification(&self, notification: &Notification) -> Result<(), CacheError> {
        self.push(HostEvent::Show {
            notification: notification.clone(),
        });
        Ok(())
    }

    async fn close_notification(&self, id: Uuid) -> Result<(), CacheError> {
        self.push(HostEvent::Close { id });
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), CacheError> {
        self.push(HostEvent::OpenWindow {
            url: url.to_string(),
        });
        Ok(())
    }
}
