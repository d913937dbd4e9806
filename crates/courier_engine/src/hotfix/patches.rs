//! Patches shipped with the engine.

use super::{HotFixContext, HotFixPatch, HotFixPhase, Version};
use crate::error::SyncResult;
use crate::model::{Message, SystemMessageKind};
use courier_store::{keys, MetaValue};
use tracing::info;

/// 1.1.0: tokens registered by older clients were uploaded without their
/// transport; register the stored token again.
#[derive(Debug)]
pub struct ResetPushTokenRegistration {
    version: Version,
}

impl ResetPushTokenRegistration {
    /// Creates the patch.
    pub fn new() -> Self {
        Self {
            version: Version::from_components([1, 1, 0]),
        }
    }
}

impl Default for ResetPushTokenRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl HotFixPatch for ResetPushTokenRegistration {
    fn version(&self) -> &Version {
        &self.version
    }

    fn phase(&self) -> HotFixPhase {
        HotFixPhase::Startup
    }

    fn name(&self) -> &str {
        "reset push token registration"
    }

    fn apply(&self, ctx: &HotFixContext<'_>) -> SyncResult<()> {
        if ctx.store.get_bool(keys::PUSH_TOKEN_REGISTERED)? == Some(true) {
            ctx.store
                .set(keys::PUSH_TOKEN_REGISTERED, MetaValue::Bool(false))?;
            info!("push token will be registered again");
        }
        Ok(())
    }
}

/// 1.2.0: group conversations synced by older clients lack the
/// new-conversation system message.
#[derive(Debug)]
pub struct InsertNewConversationSystemMessages {
    version: Version,
}

impl InsertNewConversationSystemMessages {
    /// Creates the patch.
    pub fn new() -> Self {
        Self {
            version: Version::from_components([1, 2, 0]),
        }
    }
}

impl Default for InsertNewConversationSystemMessages {
    fn default() -> Self {
        Self::new()
    }
}

impl HotFixPatch for InsertNewConversationSystemMessages {
    fn version(&self) -> &Version {
        &self.version
    }

    fn phase(&self) -> HotFixPhase {
        HotFixPhase::AfterSync
    }

    fn name(&self) -> &str {
        "insert new-conversation system messages"
    }

    fn uses_graph(&self) -> bool {
        true
    }

    fn apply(&self, ctx: &HotFixContext<'_>) -> SyncResult<()> {
        let Some(self_user) = ctx.graph.self_user_id() else {
            return Ok(());
        };

        let mut inserted = 0usize;
        for conversation in ctx.graph.conversations().iter().filter(|c| c.is_group()) {
            let has_message = ctx
                .graph
                .messages_in(conversation.id)
                .iter()
                .any(|m| m.system == Some(SystemMessageKind::NewConversation));
            if !has_message {
                ctx.graph.add_message(Message::system(
                    conversation.id,
                    self_user,
                    SystemMessageKind::NewConversation,
                ));
                inserted += 1;
            }
        }
        info!(inserted, "inserted new-conversation system messages");
        Ok(())
    }
}

/// 1.3.0: the id list written by older clients was unbounded.
#[derive(Debug)]
pub struct PurgePreviouslyReceivedEventIds {
    version: Version,
}

impl PurgePreviouslyReceivedEventIds {
    /// Creates the patch.
    pub fn new() -> Self {
        Self {
            version: Version::from_components([1, 3, 0]),
        }
    }
}

impl Default for PurgePreviouslyReceivedEventIds {
    fn default() -> Self {
        Self::new()
    }
}

impl HotFixPatch for PurgePreviouslyReceivedEventIds {
    fn version(&self) -> &Version {
        &self.version
    }

    fn phase(&self) -> HotFixPhase {
        HotFixPhase::AfterSync
    }

    fn name(&self) -> &str {
        "purge previously received push event ids"
    }

    fn apply(&self, ctx: &HotFixContext<'_>) -> SyncResult<()> {
        ctx.store.remove(keys::PREVIOUSLY_RECEIVED_EVENT_IDS)?;
        Ok(())
    }
}
