//! Job contract for the GiveHub background pipeline.
//!
//! This library defines the types shared by every producer and consumer:
//! - **Job**: the unit of asynchronous work crossing the broker boundary
//! - **PipelineError / ErrorCategory**: the retry-relevant error taxonomy
//! - **RetryPolicy / Backoff**: when and how failed deliveries are retried
//! - **JobHandler**: the trait every pipeline handler implements
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌────────────────┐
//! │  API handler │────▶│  Producer.enqueue │────▶│  broker queue  │
//! └──────────────┘     └───────────────────┘     └────────────────┘
//!                                                        │
//!                                                        ▼
//!                       ┌───────────────────┐     ┌────────────────┐
//!                       │ JobHandler.handle │◀────│  QueueWorker   │
//!                       └───────────────────┘     └────────────────┘
//! ```
//!
//! The broker and the pipelines depend on this crate; it depends on nothing
//! but serialization and time.
//!
//! # Example
//!
//! ```rust
//! use jobs::{Job, JobSource, JobType};
//! use serde_json::json;
//!
//! let job = Job::new(
//!     JobType::PostLiked,
//!     json!({ "postId": "P1", "userId": "U2", "postOwnerId": "U1" }),
//!     JobSource::Api,
//! )
//! .unwrap();
//!
//! assert_eq!(job.meta.retry_count, 0);
//! ```

mod error;
mod handler;
mod job;
mod policy;

pub use error::{ErrorCategory, PipelineError};
pub use handler::{FailingHandler, JobHandler, NoOpHandler, Outcome};
pub use job::{Job, JobMeta, JobSource, JobType, Queue, ValidationError};
pub use policy::{Backoff, RetryPolicy};
