//! The COMMENT_ADDED scenario, end to end through the handler.

use std::sync::Arc;

use jobs::{Job, JobHandler, JobSource, JobType, Outcome};
use notifications::{
    InMemoryStore, NotificationHandler, NotificationKind, RecordingPublisher,
};
use serde_json::json;

#[tokio::test]
async fn comment_added_yields_one_record_and_one_publish() {
    let store = Arc::new(InMemoryStore::new());
    let realtime = Arc::new(RecordingPublisher::new());
    let handler = NotificationHandler::new(store.clone(), realtime.clone());

    let job = Job::new(
        JobType::CommentAdded,
        json!({ "postId": "P1", "userId": "U2", "postOwnerId": "U1" }),
        JobSource::Api,
    )
    .unwrap();

    let outcome = handler.handle(&job).await.unwrap();
    assert_eq!(outcome, Outcome::Done);

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].receiver, "U1");
    assert_eq!(records[0].sender, "U2");
    assert_eq!(records[0].kind, NotificationKind::Comment);
    assert_eq!(records[0].subject_id, "P1");
    assert!(!records[0].read);

    let published = realtime.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "U1");
    assert_eq!(published[0].1.id, records[0].id);
}
