//! Decoding of trigger messages into project change events.
//!
//! A message is a Pub/Sub message whose `data` is base64 encoded JSON. Project
//! messages come from an asset feed and carry the project resource under
//! `asset.resource.data`. Budget alert messages share the same topic because the
//! budget's notification sink points back at it; they are recognized by their
//! `budgetId` attribute.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

pub const BUDGET_ID_LABEL: &str = "budget-id";
pub const PROJECT_ID_LABEL: &str = "project-id";

const BUDGET_ID_ATTRIBUTE: &str = "budgetId";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no asset.resource.data")]
    MissingProjectData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    DeleteRequested,
    Other(String),
}

impl LifecycleState {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleState::Active => "ACTIVE",
            LifecycleState::DeleteRequested => "DELETE_REQUESTED",
            LifecycleState::Other(state) => state,
        }
    }
}

impl From<String> for LifecycleState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ACTIVE" => LifecycleState::Active,
            "DELETE_REQUESTED" => LifecycleState::DeleteRequested,
            _ => LifecycleState::Other(s),
        }
    }
}

impl<'de> Deserialize<'de> for LifecycleState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(LifecycleState::from)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The project resource as carried by an asset change notification.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub project_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub project_number: String,
    #[serde(rename = "name")]
    pub project_name: String,
    pub lifecycle_state: LifecycleState,
    #[serde(rename = "createTime", with = "time::serde::rfc3339")]
    pub created_time: OffsetDateTime,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl ProjectEvent {
    pub fn budget_id(&self) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(BUDGET_ID_LABEL))
            .map(String::as_str)
    }

    pub fn has_budget_label(&self) -> bool {
        self.budget_id().is_some()
    }
}

// The v1 resource JSON encodes the project number as a string, but older feeds
// have been seen sending it as a number.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(u64),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Str(s) => s,
        Repr::Num(n) => n.to_string(),
    })
}

#[derive(Deserialize)]
struct AssetNotification {
    asset: Option<Asset>,
}

#[derive(Deserialize)]
struct Asset {
    resource: Option<AssetResource>,
}

#[derive(Deserialize)]
struct AssetResource {
    data: Option<serde_json::Value>,
}

impl FromStr for ProjectEvent {
    type Err = EventError;

    /// Parse the JSON text of an asset change record.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let notification: AssetNotification = serde_json::from_str(s)?;
        let data = notification
            .asset
            .and_then(|asset| asset.resource)
            .and_then(|resource| resource.data)
            .ok_or(EventError::MissingProjectData)?;

        Ok(serde_json::from_value(data)?)
    }
}

/// Budget alert published by the budget's notification sink.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
    pub budget_display_name: String,
    pub cost_amount: f64,
    pub budget_amount: f64,
    pub currency_code: String,
    #[serde(default)]
    pub alert_threshold_exceeded: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    pub data: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// Body posted by a push subscription.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PushEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    ProjectChange(ProjectEvent),
    BudgetAlert(BudgetAlert),
}

impl PubSubMessage {
    pub fn new(data: impl Into<String>) -> Self {
        PubSubMessage {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn decode_data(&self) -> Result<String, EventError> {
        let bytes = STANDARD.decode(self.data.trim().as_bytes())?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn decode(&self) -> Result<Notification, EventError> {
        let payload = self.decode_data()?;

        if self.attributes.contains_key(BUDGET_ID_ATTRIBUTE) {
            return Ok(Notification::BudgetAlert(serde_json::from_str(&payload)?));
        }

        Ok(Notification::ProjectChange(payload.parse()?))
    }
}
