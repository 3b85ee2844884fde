//! Mail payload parsing and validation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use jobs::PipelineError;

// Shape check only. Real deliverability is the provider's problem.
static EMAIL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap()
});

/// Raw mail payload as it arrives in `job.payload`.
///
/// `to` accepts a single address or a list; everything else is optional
/// except the subject. `validate()` turns this into a [`Mail`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailPayload {
    to: OneOrMany,
    pub subject: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(addr) => vec![addr],
            OneOrMany::Many(addrs) => addrs,
        }
    }
}

/// A validated, normalized mail ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
}

impl MailPayload {
    /// Decode the payload of a mail job. Shape failures are validation
    /// errors and never retried.
    pub fn from_value(payload: &Value) -> Result<Self, PipelineError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PipelineError::validation(format!("mail payload: {e}")))
    }

    /// Normalize and check the payload.
    ///
    /// Recipients are trimmed and lowercased; each must look like an
    /// email address. The subject must be non-empty and at least one of
    /// html/text must carry content.
    pub fn validate(self) -> Result<Mail, PipelineError> {
        let to: Vec<String> = self
            .to
            .into_vec()
            .into_iter()
            .map(|addr| addr.trim().to_lowercase())
            .filter(|addr| !addr.is_empty())
            .collect();

        if to.is_empty() {
            return Err(PipelineError::validation("mail has no recipients"));
        }
        for addr in &to {
            if !EMAIL_SHAPE.is_match(addr) {
                return Err(PipelineError::validation(format!(
                    "invalid recipient address: {addr}"
                )));
            }
        }

        let subject = self.subject.trim().to_string();
        if subject.is_empty() {
            return Err(PipelineError::validation("mail subject is empty"));
        }

        let html = self.html.filter(|s| !s.trim().is_empty());
        let text = self.text.filter(|s| !s.trim().is_empty());
        if html.is_none() && text.is_none() {
            return Err(PipelineError::validation("mail has neither html nor text body"));
        }

        Ok(Mail {
            to,
            subject,
            html,
            text,
            from_email: self.from_email,
            from_name: self.from_name,
        })
    }
}
