//! SendGrid transport.
//!
//! Sends mail via the SendGrid HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::MailConfig;
use crate::payload::Mail;
use crate::transport::{MailTransport, SendReceipt, TransportError};

const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridTransport {
    api_key: String,
    from_email: String,
    from_name: String,
    client: Client,
}

impl SendGridTransport {
    pub fn new(config: &MailConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.send_timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl MailTransport for SendGridTransport {
    async fn send(&self, mail: &Mail) -> Result<SendReceipt, TransportError> {
        // SendGrid wants text before html in the content array.
        let mut content = Vec::new();
        if let Some(text) = &mail.text {
            content.push(Content {
                content_type: "text/plain".to_string(),
                value: text.clone(),
            });
        }
        if let Some(html) = &mail.html {
            content.push(Content {
                content_type: "text/html".to_string(),
                value: html.clone(),
            });
        }

        let request = SendGridRequest {
            personalizations: vec![Personalization {
                to: mail
                    .to
                    .iter()
                    .map(|addr| EmailAddress {
                        email: addr.clone(),
                        name: None,
                    })
                    .collect(),
            }],
            from: EmailAddress {
                email: mail
                    .from_email
                    .clone()
                    .unwrap_or_else(|| self.from_email.clone()),
                name: Some(
                    mail.from_name
                        .clone()
                        .unwrap_or_else(|| self.from_name.clone()),
                ),
            },
            subject: mail.subject.clone(),
            content,
        };

        debug!(
            recipients = mail.to.len(),
            subject = %mail.subject,
            "Sending mail via SendGrid"
        );

        let response = self
            .client
            .post(SENDGRID_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();

            debug!(message_id = %message_id, "Mail accepted by SendGrid");
            return Ok(SendReceipt { message_id });
        }

        let pushback = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, error = %body, "SendGrid API error");

        Err(TransportError::Status {
            status: status.as_u16(),
            body,
            retry_after: pushback,
        })
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_all_recipients() {
        let request = SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![
                    EmailAddress {
                        email: "a@example.com".into(),
                        name: None,
                    },
                    EmailAddress {
                        email: "b@example.com".into(),
                        name: None,
                    },
                ],
            }],
            from: EmailAddress {
                email: "no-reply@givehub.example".into(),
                name: Some("GiveHub".into()),
            },
            subject: "Update".into(),
            content: vec![Content {
                content_type: "text/plain".into(),
                value: "hello".into(),
            }],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("a@example.com"));
        assert!(json.contains("b@example.com"));
        assert!(json.contains("text/plain"));
    }
}
