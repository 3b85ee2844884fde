//! Notification pipeline for the GiveHub background worker.
//!
//! Consumes the ten notification job types and turns each into one or
//! more [`Notification`] records: enrichment (payload-first, directory
//! fallback), self-notification suppression, fan-out dedup, persistence
//! via [`NotificationStore`] and best-effort realtime delivery via
//! [`RealtimePublisher`].

mod handler;
mod models;
mod nats;
mod payloads;
mod ports;

pub use handler::NotificationHandler;
pub use models::{Notification, NotificationKind};
pub use nats::{NatsRealtime, NatsStore};
pub use payloads::{EventPayload, Followed, PostInteraction, PostRemoved, Warned};
pub use ports::{
    Directory, InMemoryStore, NotificationStore, PublishError, RealtimePublisher,
    RecordingPublisher, StaticDirectory,
};
