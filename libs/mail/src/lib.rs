//! Mail pipeline for the GiveHub background worker.
//!
//! Consumes `SEND_OTP` / `SEND_EMAIL` jobs: payload validation and
//! normalization, a [`MailTransport`] abstraction with a SendGrid
//! implementation, and uniform provider-error classification so the
//! consume loop can make retry decisions without knowing any HTTP.

mod config;
mod handler;
mod payload;
mod transport;

pub use config::MailConfig;
pub use handler::MailHandler;
pub use payload::{Mail, MailPayload};
pub use transport::{
    MailTransport, MockTransport, SendGridTransport, SendReceipt, TransportError,
};
