//! The notification queue's job handler.

use std::sync::Arc;

use async_trait::async_trait;
use jobs::{Job, JobHandler, JobType, Outcome, PipelineError};
use tracing::{debug, warn};

use crate::models::{Notification, NotificationKind};
use crate::payloads::{EventPayload, Followed, PostInteraction, PostRemoved, Warned};
use crate::ports::{Directory, NotificationStore, RealtimePublisher};

/// Turns domain events into notification records plus a best-effort
/// realtime publish per recipient.
///
/// The `Directory` is optional at construction so producers that always
/// enrich their payloads can run without one; a payload that then needs
/// a lookup surfaces `MissingDependency` (a deployment bug, permanent).
pub struct NotificationHandler {
    store: Arc<dyn NotificationStore>,
    realtime: Arc<dyn RealtimePublisher>,
    directory: Option<Arc<dyn Directory>>,
}

impl NotificationHandler {
    pub fn new(store: Arc<dyn NotificationStore>, realtime: Arc<dyn RealtimePublisher>) -> Self {
        Self {
            store,
            realtime,
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    fn directory(&self) -> Result<&dyn Directory, PipelineError> {
        self.directory.as_deref().ok_or_else(|| {
            PipelineError::missing_dependency(
                "payload needs enrichment but no directory is wired",
            )
        })
    }

    /// Persist, then publish. The store write is the source of truth;
    /// a failed realtime publish is logged and dropped.
    async fn deliver(&self, notification: Notification) -> Result<(), PipelineError> {
        self.store.insert(&notification).await?;

        if let Err(e) = self
            .realtime
            .publish(&notification.receiver, &notification)
            .await
        {
            warn!(
                receiver = %notification.receiver,
                kind = %notification.kind,
                error = %e,
                "Realtime publish dropped"
            );
        }
        Ok(())
    }

    /// One notification per unique recipient. Empty and self entries are
    /// dropped before delivery.
    async fn fan_out(
        &self,
        recipients: Vec<String>,
        sender: &str,
        kind: NotificationKind,
        subject_id: &str,
        message: &str,
    ) -> Result<Outcome, PipelineError> {
        let mut unique: Vec<String> = Vec::new();
        for recipient in recipients {
            let recipient = recipient.trim().to_string();
            if recipient.is_empty() || recipient == sender || unique.contains(&recipient) {
                continue;
            }
            unique.push(recipient);
        }

        if unique.is_empty() {
            return Ok(Outcome::skipped("no recipients after dedup"));
        }

        debug!(
            kind = %kind,
            subject_id = %subject_id,
            recipients = unique.len(),
            "Fanning out notifications"
        );

        for recipient in &unique {
            self.deliver(Notification::new(recipient, sender, kind, subject_id, message))
                .await?;
        }
        Ok(Outcome::Done)
    }

    async fn on_post_interaction(
        &self,
        job: &Job,
        kind: NotificationKind,
        verb: &str,
    ) -> Result<Outcome, PipelineError> {
        let payload = PostInteraction::from_value(&job.payload)?;

        let owner = match payload.post_owner_id {
            Some(owner) => owner,
            None => match self.directory()?.post_owner(&payload.post_id).await? {
                Some(owner) => owner,
                None => return Ok(Outcome::skipped("post no longer exists")),
            },
        };

        if owner == payload.user_id {
            return Ok(Outcome::skipped("actor is the post owner"));
        }

        self.deliver(Notification::new(
            &owner,
            &payload.user_id,
            kind,
            &payload.post_id,
            &format!("{verb} your post"),
        ))
        .await?;
        Ok(Outcome::Done)
    }

    async fn on_user_followed(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = Followed::from_value(&job.payload)?;

        if payload.follower_id == payload.followed_id {
            return Ok(Outcome::skipped("user followed themselves"));
        }

        self.deliver(Notification::new(
            &payload.followed_id,
            &payload.follower_id,
            NotificationKind::Follow,
            &payload.follower_id,
            "started following you",
        ))
        .await?;
        Ok(Outcome::Done)
    }

    async fn on_post_removed(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = PostRemoved::from_value(&job.payload)?;

        let owner = match payload.owner_id {
            Some(owner) => owner,
            None => match self.directory()?.post_owner(&payload.post_id).await? {
                Some(owner) => owner,
                None => return Ok(Outcome::skipped("post no longer exists")),
            },
        };

        let message = match payload.reason {
            Some(reason) => format!("Your post was removed: {reason}"),
            None => "Your post was removed".to_string(),
        };
        self.deliver(Notification::new(
            &owner,
            Notification::SYSTEM_SENDER,
            NotificationKind::PostRemoved,
            &payload.post_id,
            &message,
        ))
        .await?;
        Ok(Outcome::Done)
    }

    async fn on_user_warned(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = Warned::from_value(&job.payload)?;

        let message = match payload.reason {
            Some(reason) => format!("You received a warning: {reason}"),
            None => "You received a warning".to_string(),
        };
        self.deliver(Notification::new(
            &payload.user_id,
            Notification::SYSTEM_SENDER,
            NotificationKind::Warning,
            &payload.user_id,
            &message,
        ))
        .await?;
        Ok(Outcome::Done)
    }

    async fn rsvp_recipients(&self, payload: &EventPayload) -> Result<Vec<String>, PipelineError> {
        match &payload.rsvp_user_ids {
            Some(ids) => Ok(ids.clone()),
            None => self.directory()?.event_rsvp_user_ids(&payload.event_id).await,
        }
    }

    /// Creator lookup is opportunistic: enrichment we can't resolve
    /// without a directory is dropped rather than failing the job.
    async fn creator_if_known(&self, payload: &EventPayload) -> Result<Option<String>, PipelineError> {
        match (&payload.creator_id, &self.directory) {
            (Some(creator), _) => Ok(Some(creator.clone())),
            (None, Some(directory)) => directory.event_creator(&payload.event_id).await,
            (None, None) => Ok(None),
        }
    }

    async fn on_event_updated(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = EventPayload::from_value(&job.payload)?;
        let recipients = self.rsvp_recipients(&payload).await?;
        let sender = payload
            .creator_id
            .clone()
            .unwrap_or_else(|| Notification::SYSTEM_SENDER.to_string());

        let message = format!("Event {} was updated", payload.display_name());
        self.fan_out(
            recipients,
            &sender,
            NotificationKind::EventUpdate,
            &payload.event_id,
            &message,
        )
        .await
    }

    async fn on_event_removed(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = EventPayload::from_value(&job.payload)?;

        // Attendees and the creator; fan_out dedups when the creator
        // also appears in the RSVP list.
        let mut recipients = self.rsvp_recipients(&payload).await?;
        if let Some(creator) = self.creator_if_known(&payload).await? {
            recipients.push(creator);
        }

        let message = format!("Event {} was cancelled", payload.display_name());
        self.fan_out(
            recipients,
            Notification::SYSTEM_SENDER,
            NotificationKind::EventRemoved,
            &payload.event_id,
            &message,
        )
        .await
    }

    async fn on_event_started(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = EventPayload::from_value(&job.payload)?;
        let recipients = self.rsvp_recipients(&payload).await?;

        let message = format!("Event {} has started", payload.display_name());
        self.fan_out(
            recipients,
            Notification::SYSTEM_SENDER,
            NotificationKind::EventStarted,
            &payload.event_id,
            &message,
        )
        .await
    }

    async fn on_escrow_threshold(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = EventPayload::from_value(&job.payload)?;

        let mut recipients = match &payload.donor_ids {
            Some(ids) => ids.clone(),
            None => self.directory()?.event_donor_ids(&payload.event_id).await?,
        };
        if let Some(creator) = self.creator_if_known(&payload).await? {
            recipients.push(creator);
        }

        let message = format!(
            "Donations for {} reached the release threshold",
            payload.display_name()
        );
        self.fan_out(
            recipients,
            Notification::SYSTEM_SENDER,
            NotificationKind::EscrowThreshold,
            &payload.event_id,
            &message,
        )
        .await
    }

    async fn on_escrow_approved(&self, job: &Job) -> Result<Outcome, PipelineError> {
        let payload = EventPayload::from_value(&job.payload)?;

        let creator = match payload.creator_id.clone() {
            Some(creator) => creator,
            None => match self.directory()?.event_creator(&payload.event_id).await? {
                Some(creator) => creator,
                None => return Ok(Outcome::skipped("event no longer exists")),
            },
        };

        let message = format!(
            "Escrow release for {} was approved",
            payload.display_name()
        );
        self.deliver(Notification::new(
            &creator,
            Notification::SYSTEM_SENDER,
            NotificationKind::EscrowApproved,
            &payload.event_id,
            &message,
        ))
        .await?;
        Ok(Outcome::Done)
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn handle(&self, job: &Job) -> Result<Outcome, PipelineError> {
        match job.job_type {
            JobType::PostLiked => {
                self.on_post_interaction(job, NotificationKind::Like, "liked")
                    .await
            }
            JobType::CommentAdded => {
                self.on_post_interaction(job, NotificationKind::Comment, "commented on")
                    .await
            }
            JobType::UserFollowed => self.on_user_followed(job).await,
            JobType::PostRemoved => self.on_post_removed(job).await,
            JobType::UserWarned => self.on_user_warned(job).await,
            JobType::EventUpdated => self.on_event_updated(job).await,
            JobType::EventRemoved => self.on_event_removed(job).await,
            JobType::EventStarted => self.on_event_started(job).await,
            JobType::EscrowThresholdReached => self.on_escrow_threshold(job).await,
            JobType::EscrowApproved => self.on_escrow_approved(job).await,
            JobType::SendOtp | JobType::SendEmail => Err(PipelineError::permanent(format!(
                "job type {} does not belong on the notification queue",
                job.job_type
            ))),
        }
    }

    fn name(&self) -> &str {
        "notifications"
    }
}
