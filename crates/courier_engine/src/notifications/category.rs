//! Notification categories and actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a local notification. Each category offers a fixed list of
/// actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationCategory {
    /// A message or conversation change.
    #[serde(rename = "conversationCategory")]
    Conversation,
    /// A message that can be liked from the notification.
    #[serde(rename = "conversationCategoryWithLike")]
    ConversationWithLike,
    /// A ringing call.
    #[serde(rename = "incomingCallCategory")]
    IncomingCall,
    /// A call that ended before self joined.
    #[serde(rename = "missedCallCategory")]
    MissedCall,
    /// A connection request.
    #[serde(rename = "connectCategory")]
    Connect,
}

impl NotificationCategory {
    /// Every category.
    pub const ALL: [NotificationCategory; 5] = [
        NotificationCategory::Conversation,
        NotificationCategory::ConversationWithLike,
        NotificationCategory::IncomingCall,
        NotificationCategory::MissedCall,
        NotificationCategory::Connect,
    ];

    /// Returns the category identifier.
    pub fn identifier(&self) -> &'static str {
        match self {
            NotificationCategory::Conversation => "conversationCategory",
            NotificationCategory::ConversationWithLike => "conversationCategoryWithLike",
            NotificationCategory::IncomingCall => "incomingCallCategory",
            NotificationCategory::MissedCall => "missedCallCategory",
            NotificationCategory::Connect => "connectCategory",
        }
    }

    /// Parses a category identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.identifier() == identifier)
    }

    /// Returns the actions offered by notifications of this category.
    pub fn actions(&self) -> &'static [NotificationAction] {
        use NotificationAction::*;
        match self {
            NotificationCategory::Conversation => &[Reply, Mute],
            NotificationCategory::ConversationWithLike => &[Reply, Like, Mute],
            NotificationCategory::IncomingCall => &[CallAccept, CallIgnore, CallMessage],
            NotificationCategory::MissedCall => &[CallBack, CallMessage],
            NotificationCategory::Connect => &[ConnectAccept],
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// An action the user can take on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationAction {
    /// Reply with text.
    #[serde(rename = "replyAction")]
    Reply,
    /// Mute the conversation.
    #[serde(rename = "muteAction")]
    Mute,
    /// Like the message.
    #[serde(rename = "likeAction")]
    Like,
    /// Join the ringing call.
    #[serde(rename = "callAcceptAction")]
    CallAccept,
    /// Ignore the ringing call.
    #[serde(rename = "callIgnoreAction")]
    CallIgnore,
    /// Call back after a missed call.
    #[serde(rename = "callBackAction")]
    CallBack,
    /// Answer a call with a message.
    #[serde(rename = "callMessageAction")]
    CallMessage,
    /// Accept a connection request.
    #[serde(rename = "connectAcceptAction")]
    ConnectAccept,
    /// Open the conversation. This is the default action of every category.
    #[serde(rename = "openAction")]
    Open,
}

impl NotificationAction {
    /// Every action.
    pub const ALL: [NotificationAction; 9] = [
        NotificationAction::Reply,
        NotificationAction::Mute,
        NotificationAction::Like,
        NotificationAction::CallAccept,
        NotificationAction::CallIgnore,
        NotificationAction::CallBack,
        NotificationAction::CallMessage,
        NotificationAction::ConnectAccept,
        NotificationAction::Open,
    ];

    /// Returns the action identifier.
    pub fn identifier(&self) -> &'static str {
        match self {
            NotificationAction::Reply => "replyAction",
            NotificationAction::Mute => "muteAction",
            NotificationAction::Like => "likeAction",
            NotificationAction::CallAccept => "callAcceptAction",
            NotificationAction::CallIgnore => "callIgnoreAction",
            NotificationAction::CallBack => "callBackAction",
            NotificationAction::CallMessage => "callMessageAction",
            NotificationAction::ConnectAccept => "connectAcceptAction",
            NotificationAction::Open => "openAction",
        }
    }

    /// Parses an action identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.identifier() == identifier)
    }

    /// Returns true if the action needs text typed by the user.
    pub fn takes_text(&self) -> bool {
        matches!(self, NotificationAction::Reply | NotificationAction::CallMessage)
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
