//! Local notifications.
//!
//! The dispatcher turns update events into notifications the platform can
//! show. Notifications carry a category from a closed vocabulary; the
//! category decides which actions the user is offered.

mod category;
mod dispatcher;

pub use category::{NotificationAction, NotificationCategory};
pub use dispatcher::LocalNotificationDispatcher;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification to show to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalNotification {
    /// Notification id.
    pub id: Uuid,
    /// Category.
    pub category: NotificationCategory,
    /// Conversation the notification is about.
    pub conversation: Option<Uuid>,
    /// User who caused the notification.
    pub sender: Option<Uuid>,
    /// Nonce of the message, for message notifications.
    pub message_nonce: Option<Uuid>,
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
}

impl LocalNotification {
    /// Creates a notification without conversation or sender.
    pub fn new(
        category: NotificationCategory,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            conversation: None,
            sender: None,
            message_nonce: None,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Sets the conversation.
    pub fn with_conversation(mut self, conversation: Uuid) -> Self {
        self.conversation = Some(conversation);
        self
    }

    /// Sets the sender.
    pub fn with_sender(mut self, sender: Uuid) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Sets the message nonce.
    pub fn with_message(mut self, nonce: Uuid) -> Self {
        self.message_nonce = Some(nonce);
        self
    }

    /// Returns the actions offered by this notification.
    pub fn actions(&self) -> &'static [NotificationAction] {
        self.category.actions()
    }

    /// Returns true if the notification offers `action`. Opening is always
    /// offered.
    pub fn offers(&self, action: NotificationAction) -> bool {
        action == NotificationAction::Open || self.actions().contains(&action)
    }
}
