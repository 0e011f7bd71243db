//! Webhook event normalization.
//!
//! Producers wrap every event in the same envelope:
//!
//! ```json
//! { "messageId": "…", "messageType": "…", "messageTimestamp": "…", "body": "<json string>" }
//! ```
//!
//! `body` is itself JSON, encoded as a string. Each route knows which
//! message types it understands and turns them into [`FormattedEvent`]s,
//! the single shape that goes onto the queue. Unknown message types produce
//! no events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::IngestError;

/// Every formatted event names this as its origin.
const SOURCE: &str = "internal-products";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct BaseEvent {
    pub message_id: String,
    pub message_type: String,
    pub message_timestamp: String,
    pub body: String,
}

impl BaseEvent {
    pub(crate) fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Canonical event published to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedEvent {
    pub user: EventUser,
    pub context: Value,
    pub category: String,
    pub action: String,
    pub system: EventSystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUser {
    pub ft_guid: String,
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSystem {
    pub source: String,
}

impl FormattedEvent {
    fn new(user_id: String, context: Value, category: &str, action: &str) -> Self {
        // ---
        Self {
            user: EventUser {
                ft_guid: user_id.clone(),
                uuid: user_id,
            },
            context,
            category: category.to_string(),
            action: action.to_string(),
            system: EventSystem {
                source: SOURCE.to_string(),
            },
        }
    }
}

/// Envelope fields copied into every context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ChangeMeta {
    message_type: String,
    timestamp: String,
    message_id: String,
}

impl ChangeMeta {
    fn from_base(base: &BaseEvent) -> Self {
        Self {
            message_type: base.message_type.clone(),
            timestamp: base.message_timestamp.clone(),
            message_id: base.message_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PreferenceChange {
    // also copied to `user` on the formatted event
    #[serde(skip_serializing_if = "String::is_empty")]
    uuid: String,

    suppressed_marketing: bool,
    suppressed_newsletter: bool,
    suppressed_recommendation: bool,
    suppressed_account: bool,
    expired: bool,
    lists: Vec<String>,
    modified_paths: Vec<String>,

    // overwritten from the envelope
    #[serde(flatten)]
    change: ChangeMeta,
}

/// Parse the envelope, rejecting anything that carries no event at all.
pub(crate) fn parse_base(bytes: &[u8]) -> Result<BaseEvent, IngestError> {
    // ---
    let base: BaseEvent = serde_json::from_slice(bytes)
        .map_err(|e| IngestError::MalformedBody(format!("invalid envelope: {e}")))?;

    if base.is_empty() {
        return Err(IngestError::MalformedBody("no valid message events".into()));
    }
    Ok(base)
}

/// `/webhooks/user-preferences`
pub(crate) fn format_preference_event(base: &BaseEvent) -> Result<Vec<FormattedEvent>, IngestError> {
    // ---
    match base.message_type.as_str() {
        "UserPreferenceUpdated" | "UserPreferenceCreated" => {}
        _ => return Ok(Vec::new()),
    }

    let mut pref: PreferenceChange = serde_json::from_str(&base.body)
        .map_err(|e| IngestError::MalformedBody(format!("invalid preference body: {e}")))?;
    pref.change = ChangeMeta::from_base(base);

    let user_id = pref.uuid.clone();
    let context = serde_json::to_value(&pref)
        .map_err(|e| IngestError::MalformedBody(format!("cannot format preference: {e}")))?;

    Ok(vec![FormattedEvent::new(
        user_id,
        context,
        "user-preference",
        "change",
    )])
}

/// `/webhooks/membership`
pub(crate) fn format_membership_event(base: &BaseEvent) -> Result<Vec<FormattedEvent>, IngestError> {
    // ---
    let action = match base.message_type.as_str() {
        "UserCreated" => "create",
        "UserUpdated" => "update",
        "SubscriptionPurchased" => "purchase",
        "SubscriptionCancelled" => "cancel",
        _ => return Ok(Vec::new()),
    };

    let mut context: Map<String, Value> = serde_json::from_str(&base.body)
        .map_err(|e| IngestError::MalformedBody(format!("invalid membership body: {e}")))?;

    let user_id = context
        .get("uuid")
        .or_else(|| context.get("user").and_then(|user| user.get("id")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let meta = ChangeMeta::from_base(base);
    context.insert("messageType".into(), Value::String(meta.message_type));
    context.insert("timestamp".into(), Value::String(meta.timestamp));
    context.insert("messageId".into(), Value::String(meta.message_id));

    Ok(vec![FormattedEvent::new(
        user_id,
        Value::Object(context),
        "membership",
        action,
    )])
}
