//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of event a notification describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    PostRemoved,
    Warning,
    EventUpdate,
    EventRemoved,
    EventStarted,
    EscrowThreshold,
    EscrowApproved,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
            NotificationKind::PostRemoved => "post_removed",
            NotificationKind::Warning => "warning",
            NotificationKind::EventUpdate => "event_update",
            NotificationKind::EventRemoved => "event_removed",
            NotificationKind::EventStarted => "event_started",
            NotificationKind::EscrowThreshold => "escrow_threshold",
            NotificationKind::EscrowApproved => "escrow_approved",
        };
        f.write_str(name)
    }
}

/// One notification record, as persisted and as published realtime.
///
/// `sender` is `"system"` for moderation and event lifecycle events that
/// no single user triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub receiver: String,
    pub sender: String,
    pub kind: NotificationKind,
    /// The document the notification is about (post ID, event ID, ...).
    pub subject_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub const SYSTEM_SENDER: &'static str = "system";

    pub fn new(
        receiver: impl Into<String>,
        sender: impl Into<String>,
        kind: NotificationKind,
        subject_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            receiver: receiver.into(),
            sender: sender.into(),
            kind,
            subject_id: subject_id.into(),
            message: message.into(),
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_notifications_are_unread() {
        let n = Notification::new("U1", "U2", NotificationKind::Like, "P1", "liked your post");
        assert!(!n.read);
        assert_eq!(n.receiver, "U1");
        assert_eq!(n.sender, "U2");
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::EscrowThreshold).unwrap(),
            "\"escrow_threshold\""
        );
        assert_eq!(NotificationKind::Comment.to_string(), "comment");
    }
}
