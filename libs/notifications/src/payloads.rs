//! Typed payloads for the notification job types.
//!
//! Enriched fields (`postOwnerId`, `rsvpUserIds`, `donorIds`,
//! `creatorId`) are optional: producers that already know them save the
//! pipeline a directory lookup, producers that don't leave them out.

use jobs::PipelineError;
use serde::Deserialize;
use serde_json::Value;

fn decode<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T, PipelineError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| PipelineError::validation(format!("notification payload: {e}")))
}

/// `POST_LIKED` and `COMMENT_ADDED`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInteraction {
    pub post_id: String,
    /// The acting user (liker / commenter).
    pub user_id: String,
    #[serde(default)]
    pub post_owner_id: Option<String>,
}

impl PostInteraction {
    pub fn from_value(payload: &Value) -> Result<Self, PipelineError> {
        decode(payload)
    }
}

/// `USER_FOLLOWED`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Followed {
    pub follower_id: String,
    pub followed_id: String,
}

impl Followed {
    pub fn from_value(payload: &Value) -> Result<Self, PipelineError> {
        decode(payload)
    }
}

/// `POST_REMOVED`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRemoved {
    pub post_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PostRemoved {
    pub fn from_value(payload: &Value) -> Result<Self, PipelineError> {
        decode(payload)
    }
}

/// `USER_WARNED`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warned {
    pub user_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Warned {
    pub fn from_value(payload: &Value) -> Result<Self, PipelineError> {
        decode(payload)
    }
}

/// The event lifecycle and escrow types share one payload shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event_id: String,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub rsvp_user_ids: Option<Vec<String>>,
    #[serde(default)]
    pub donor_ids: Option<Vec<String>>,
    #[serde(default)]
    pub title: Option<String>,
}

impl EventPayload {
    pub fn from_value(payload: &Value) -> Result<Self, PipelineError> {
        decode(payload)
    }

    /// Display name for messages; falls back to the ID.
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.event_id)
    }
}
