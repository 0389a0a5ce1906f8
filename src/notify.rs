//! Notification transport used for inactivity alerts.

use crate::error::NotifyError;
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

/// Notify when a device becomes active again.
pub const NOTIFY_ACTIVE: u32 = 1;
/// Notify when a device is marked inactive.
pub const NOTIFY_INACTIVE: u32 = 2;

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub excerpt: String,
}

/// Delivery of notifications. Must not block.
pub trait Notifier: Send {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(excerpt = %notification.excerpt, "Notification");
        Ok(())
    }
}

/// Queues notifications for another thread to deliver.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(sender: Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::Full,
            TrySendError::Disconnected(_) => NotifyError::Closed,
        })
    }
}
