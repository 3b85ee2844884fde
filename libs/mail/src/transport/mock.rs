//! In-memory transport for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::payload::Mail;
use crate::transport::{MailTransport, SendReceipt, TransportError};

/// Records sent mail; can be scripted to fail.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Mail>>,
    failures: Mutex<Vec<TransportError>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure; each send consumes one before succeeding.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().expect("mock lock").push(error);
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, mail: &Mail) -> Result<SendReceipt, TransportError> {
        if let Some(error) = self.failures.lock().expect("mock lock").pop() {
            return Err(error);
        }

        let mut sent = self.sent.lock().expect("mock lock");
        sent.push(mail.clone());
        Ok(SendReceipt {
            message_id: format!("mock-{}", sent.len()),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
