//! Management notifications to table owners.
//!
//! An owner may ask to be told, by message, when its table needs attention
//! (a validation or an activation was requested). The core only records the
//! descriptor and hands it to a [`MessageSink`] outside the registry lock.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppId;

/// Message an owner wants sent when its table needs management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyDescriptor {
    /// Message id of the owner's command pipe.
    pub msg_id: u32,
    /// Command code within that message id.
    pub command_code: u16,
    /// Parameter echoed back to the owner.
    pub parameter: u32,
}

/// Delivers notification messages.
pub trait MessageSink: Send + Sync {
    /// Sends `notify` to the owner of `table`.
    fn send_notification(&self, owner: AppId, table: &str, notify: &NotifyDescriptor);
}

/// Logs notifications instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageSink;

impl MessageSink for TracingMessageSink {
    fn send_notification(&self, owner: AppId, table: &str, notify: &NotifyDescriptor) {
        info!(
            owner = owner.value(),
            table,
            msg_id = notify.msg_id,
            command_code = notify.command_code,
            parameter = notify.parameter,
            "table management notification"
        );
    }
}

/// Notification queued inside a transaction.
#[derive(Debug, Clone)]
pub(crate) struct PendingNotification {
    pub owner: AppId,
    pub table: String,
    pub notify: NotifyDescriptor,
}
