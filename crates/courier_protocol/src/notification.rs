//! Notification stream payloads.
//!
//! The backend groups events into notifications. Each notification has a
//! UUID and a list of event payloads; the events it carries inherit that
//! UUID. Pages of notifications are returned by the `/notifications`
//! endpoint.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{uuid_field, EventSource, UpdateEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single backend notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification UUID, shared by every event it carries.
    pub id: Uuid,
    /// Transient notifications are never stored by the backend.
    #[serde(default)]
    pub transient: bool,
    /// Raw event payloads.
    #[serde(default)]
    pub payload: Vec<Value>,
}

impl Notification {
    /// Decodes a notification from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is missing or not a UUID, or if `payload`
    /// is present but not an array.
    pub fn from_json(value: &Value) -> ProtocolResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::invalid_field("notification", "expected object"))?;

        let id = uuid_field(object, "id")?;
        let transient = object
            .get("transient")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let payload = match object.get("payload") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(ProtocolError::invalid_field("payload", "expected array")),
        };

        Ok(Self {
            id,
            transient,
            payload,
        })
    }

    /// Converts the notification into update events.
    ///
    /// Payload entries without a `type` are skipped.
    pub fn events(&self, source: EventSource) -> Vec<UpdateEvent> {
        self.payload
            .iter()
            .filter_map(|item| {
                UpdateEvent::from_payload(self.id, item.clone(), source, self.transient).ok()
            })
            .collect()
    }
}

/// A page of the notification stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationPage {
    /// Notifications in stream order.
    pub notifications: Vec<Notification>,
    /// Whether more notifications are available after this page.
    #[serde(default)]
    pub has_more: bool,
}

impl NotificationPage {
    /// Decodes a page from a JSON value.
    ///
    /// Notifications that fail to decode are dropped; a page with a broken
    /// entry is still usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object.
    pub fn from_json(value: &Value) -> ProtocolResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::invalid_field("page", "expected object"))?;

        let notifications = object
            .get("notifications")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| Notification::from_json(item).ok())
                    .collect()
            })
            .unwrap_or_default();
        let has_more = object
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            notifications,
            has_more,
        })
    }

    /// Returns the id of the last notification on the page.
    pub fn last_id(&self) -> Option<Uuid> {
        self.notifications.last().map(|n| n.id)
    }

    /// Flattens the page into update events in stream order.
    pub fn events(&self, source: EventSource) -> Vec<UpdateEvent> {
        self.notifications
            .iter()
            .flat_map(|n| n.events(source))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UpdateEventType;
    use serde_json::json;

    fn notification(id: Uuid, types: &[&str]) -> Value {
        let payload: Vec<Value> = types.iter().map(|t| json!({ "type": t })).collect();
        json!({ "id": id.to_string(), "payload": payload })
    }

    #[test]
    fn events_share_notification_id() {
        let id = Uuid::new_v4();
        let value = notification(id, &["conversation.rename", "user.update"]);

        let note = Notification::from_json(&value).unwrap();
        let events = note.events(EventSource::Download);

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.id == id));
        assert_eq!(events[0].event_type, UpdateEventType::ConversationRename);
        assert_eq!(events[1].event_type, UpdateEventType::UserUpdate);
        assert!(events.iter().all(|e| e.source == EventSource::Download));
    }

    #[test]
    fn transient_flag_is_carried() {
        let value = json!({
            "id": Uuid::new_v4().to_string(),
            "transient": true,
            "payload": [{ "type": "call.flow-active" }]
        });

        let events = Notification::from_json(&value)
            .unwrap()
            .events(EventSource::WebSocket);
        assert!(events[0].transient);
    }

    #[test]
    fn entries_without_type_are_skipped() {
        let value = json!({
            "id": Uuid::new_v4().to_string(),
            "payload": [{ "type": "user.update" }, { "nothing": 1 }]
        });

        let events = Notification::from_json(&value)
            .unwrap()
            .events(EventSource::Download);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn notification_requires_id() {
        let result = Notification::from_json(&json!({ "payload": [] }));
        assert!(matches!(result, Err(ProtocolError::MissingField("id"))));

        let result = Notification::from_json(&json!({ "id": "x", "payload": {} }));
        assert!(matches!(result, Err(ProtocolError::InvalidUuid { .. })));
    }

    #[test]
    fn page_decodes_in_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let value = json!({
            "notifications": [
                notification(first, &["conversation.create"]),
                { "broken": true },
                notification(second, &["conversation.message-add", "conversation.rename"]),
            ],
            "has_more": true
        });

        let page = NotificationPage::from_json(&value).unwrap();
        assert_eq!(page.notifications.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.last_id(), Some(second));

        let ids: Vec<Uuid> = page.events(EventSource::Download).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, second, second]);
    }

    #[test]
    fn empty_page() {
        let page = NotificationPage::from_json(&json!({})).unwrap();
        assert!(page.notifications.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.last_id(), None);

        assert!(NotificationPage::from_json(&json!("nope")).is_err());
    }
}
