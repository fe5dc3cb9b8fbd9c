//! Messages sent to members when something happens in one of their groups
//!
//! Delivery is best effort. A failing [`Notifier`] is logged by the caller
//! and never fails the mutation that triggered it.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{EventId, GroupId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    GroupInvite {
        group_id: GroupId,
        group_name: String,
        sender_name: String,
        recipients: Vec<UserId>,
    },
    EventAdded {
        group_id: GroupId,
        group_name: String,
        event_id: EventId,
        notes: String,
        date: NaiveDate,
        recipients: Vec<UserId>,
    },
    InviteAccepted {
        group_id: GroupId,
        group_name: String,
        member_name: String,
        recipients: Vec<UserId>,
    },
    MemberLeft {
        group_id: GroupId,
        group_name: String,
        member_name: String,
        recipients: Vec<UserId>,
    },
    MemberRemoved {
        group_id: GroupId,
        group_name: String,
        member_name: String,
        removed_by: String,
        recipients: Vec<UserId>,
    },
}

impl Notification {
    pub fn title(&self) -> String {
        match self {
            Notification::GroupInvite { .. } => "New Group Invitation".to_string(),
            Notification::EventAdded { group_name, .. } => format!("New Event in {}", group_name),
            Notification::InviteAccepted { group_name, .. } => {
                format!("New member in {}", group_name)
            }
            Notification::MemberLeft { group_name, .. } => {
                format!("Member left {}", group_name)
            }
            Notification::MemberRemoved { group_name, .. } => {
                format!("Member removed from {}", group_name)
            }
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::GroupInvite {
                group_name,
                sender_name,
                ..
            } => {
                let sender = if sender_name.is_empty() {
                    "Someone"
                } else {
                    sender_name.as_str()
                };
                format!("{} invited you to join {}", sender, group_name)
            }
            Notification::EventAdded { notes, date, .. } => format!("{} on {}", notes, date),
            Notification::InviteAccepted {
                group_name,
                member_name,
                ..
            } => format!("{} accepted the invitation to {}", member_name, group_name),
            Notification::MemberLeft {
                group_name,
                member_name,
                ..
            } => format!("{} left {}", member_name, group_name),
            Notification::MemberRemoved {
                group_name,
                member_name,
                removed_by,
                ..
            } => format!("{} removed {} from {}", removed_by, member_name, group_name),
        }
    }

    pub fn group_id(&self) -> GroupId {
        match self {
            Notification::GroupInvite { group_id, .. }
            | Notification::EventAdded { group_id, .. }
            | Notification::InviteAccepted { group_id, .. }
            | Notification::MemberLeft { group_id, .. }
            | Notification::MemberRemoved { group_id, .. } => *group_id,
        }
    }

    pub fn recipients(&self) -> &[UserId] {
        match self {
            Notification::GroupInvite { recipients, .. }
            | Notification::EventAdded { recipients, .. }
            | Notification::InviteAccepted { recipients, .. }
            | Notification::MemberLeft { recipients, .. }
            | Notification::MemberRemoved { recipients, .. } => recipients,
        }
    }
}

/// Delivery channel for notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Writes every notification to the log
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            group_id = notification.group_id(),
            recipients = ?notification.recipients(),
            "{}: {}",
            notification.title(),
            notification.body()
        );
        Ok(())
    }
}

/// Queues notifications for the host to pick up
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    outbox: Mutex<Vec<Notification>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.outbox.lock())
    }

    pub fn len(&self) -> usize {
        self.outbox.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.lock().is_empty()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn deliver(&self, notification: Notification) -> anyhow::Result<()> {
        self.outbox.lock().push(notification);
        Ok(())
    }
}
