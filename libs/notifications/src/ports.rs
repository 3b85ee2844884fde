//! Collaborator ports for the notification pipeline.
//!
//! The handler talks to persistence, realtime delivery and directory
//! lookups only through these traits. Production wires the NATS-backed
//! implementations from [`crate::nats`]; tests use the in-memory doubles
//! defined here.

use async_trait::async_trait;
use jobs::PipelineError;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::Notification;

/// Durable storage of notification records. The write here is the source
/// of truth for "the user was notified".
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<(), PipelineError>;
}

/// Realtime publish failure. Callers log and drop it; the stored record
/// already happened.
#[derive(Debug, Error)]
#[error("realtime publish failed: {0}")]
pub struct PublishError(pub String);

/// Best-effort realtime fan-out, keyed by recipient.
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(
        &self,
        receiver: &str,
        notification: &Notification,
    ) -> Result<(), PublishError>;
}

/// Enrichment lookups for payloads that arrive without their target IDs.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Owner of a post, or `None` if the post is gone.
    async fn post_owner(&self, post_id: &str) -> Result<Option<String>, PipelineError>;

    /// Users who RSVP'd to an event.
    async fn event_rsvp_user_ids(&self, event_id: &str) -> Result<Vec<String>, PipelineError>;

    /// Users who donated to an event.
    async fn event_donor_ids(&self, event_id: &str) -> Result<Vec<String>, PipelineError>;

    /// Creator of an event, or `None` if the event is gone.
    async fn event_creator(&self, event_id: &str) -> Result<Option<String>, PipelineError>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<Notification>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Notification> {
        self.records.lock().expect("store lock").clone()
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<(), PipelineError> {
        self.records
            .lock()
            .expect("store lock")
            .push(notification.clone());
        Ok(())
    }
}

/// Recording publisher for tests; can be scripted to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Notification)>>,
    failing: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("publisher lock") = failing;
    }

    pub fn published(&self) -> Vec<(String, Notification)> {
        self.published.lock().expect("publisher lock").clone()
    }
}

#[async_trait]
impl RealtimePublisher for RecordingPublisher {
    async fn publish(
        &self,
        receiver: &str,
        notification: &Notification,
    ) -> Result<(), PublishError> {
        if *self.failing.lock().expect("publisher lock") {
            return Err(PublishError("scripted failure".into()));
        }
        self.published
            .lock()
            .expect("publisher lock")
            .push((receiver.to_string(), notification.clone()));
        Ok(())
    }
}

/// Fixed-answer directory for tests.
#[derive(Default)]
pub struct StaticDirectory {
    pub post_owners: HashMap<String, String>,
    pub rsvps: HashMap<String, Vec<String>>,
    pub donors: HashMap<String, Vec<String>>,
    pub creators: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post_owner(mut self, post_id: &str, owner: &str) -> Self {
        self.post_owners.insert(post_id.into(), owner.into());
        self
    }

    pub fn with_event(mut self, event_id: &str, creator: &str, rsvps: &[&str]) -> Self {
        self.creators.insert(event_id.into(), creator.into());
        self.rsvps
            .insert(event_id.into(), rsvps.iter().map(|s| s.to_string()).collect());
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn post_owner(&self, post_id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.post_owners.get(post_id).cloned())
    }

    async fn event_rsvp_user_ids(&self, event_id: &str) -> Result<Vec<String>, PipelineError> {
        Ok(self.rsvps.get(event_id).cloned().unwrap_or_default())
    }

    async fn event_donor_ids(&self, event_id: &str) -> Result<Vec<String>, PipelineError> {
        Ok(self.donors.get(event_id).cloned().unwrap_or_default())
    }

    async fn event_creator(&self, event_id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.creators.get(event_id).cloned())
    }
}
