//! Candidate email delivery.

pub mod templates;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::parse_env;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("email delivery is not configured")]
    Disabled,
    #[error("candidate has no email address")]
    NoRecipient,
    #[error("email API rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("email transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailerConfig {
    pub api_key: Option<String>,
    pub from: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from: "Hireflow <notifications@hireflow.dev>".into(),
            endpoint: "https://api.resend.com/emails".into(),
            timeout_secs: 10,
        }
    }
}

impl MailerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("EMAIL_API_KEY")
                .ok()
                .or_else(|| std::env::var("RESEND_API_KEY").ok())
                .filter(|key| !key.trim().is_empty()),
            from: std::env::var("HF_MAIL_FROM").unwrap_or(defaults.from),
            endpoint: std::env::var("EMAIL_ENDPOINT").unwrap_or(defaults.endpoint),
            timeout_secs: parse_env::<u64>("EMAIL_TIMEOUT_SECONDS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.timeout_secs),
        }
    }

    /// Builds the HTTP mailer, or a no-op one when no API key is configured.
    pub fn build(self) -> Result<Box<dyn Mailer>, MailError> {
        match self.api_key.clone() {
            Some(api_key) => Ok(Box::new(HttpMailer::new(self, api_key)?)),
            None => {
                info!("no email API key configured; candidate emails will be skipped");
                Ok(Box::new(DisabledMailer))
            }
        }
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Transactional email over a Resend-style JSON API.
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    from: String,
    api_key: String,
}

impl HttpMailer {
    pub fn new(config: MailerConfig, api_key: String) -> Result<Self, MailError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            from: config.from,
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                from: &self.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(subject = %message.subject, "email accepted");
        Ok(())
    }
}

pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
        Err(MailError::Disabled)
    }
}

/// Keeps every message in memory; optionally fails each send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Transport("connection refused".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_env::with_env;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            to: "ada@example.com".into(),
            subject: "Your interview".into(),
            html: "<p>hi</p>".into(),
        }
    }

    #[tokio::test]
    async fn http_mailer_posts_message_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer mail-key"))
            .and(body_partial_json(json!({
                "to": ["ada@example.com"],
                "subject": "Your interview"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc" })))
            .expect(1)
            .mount(&server)
            .await;

        let config = MailerConfig {
            endpoint: format!("{}/emails", server.uri()),
            ..MailerConfig::default()
        };
        let mailer = HttpMailer::new(config, "mail-key".into()).unwrap();
        mailer.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn http_mailer_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
            .mount(&server)
            .await;

        let config = MailerConfig {
            endpoint: server.uri(),
            ..MailerConfig::default()
        };
        let mailer = HttpMailer::new(config, "mail-key".into()).unwrap();
        let err = mailer.send(&message()).await.unwrap_err();
        assert!(matches!(err, MailError::Rejected { status: 422, .. }));
    }

    #[test]
    fn mailer_config_prefers_email_api_key() {
        with_env(
            &[
                ("EMAIL_API_KEY", Some("primary")),
                ("RESEND_API_KEY", Some("secondary")),
                ("HF_MAIL_FROM", Some("Jobs <jobs@example.com>")),
            ],
            || {
                let cfg = MailerConfig::from_env();
                assert_eq!(cfg.api_key.as_deref(), Some("primary"));
                assert_eq!(cfg.from, "Jobs <jobs@example.com>");
            },
        );
    }

    #[tokio::test]
    async fn recording_mailer_keeps_messages() {
        let mailer = RecordingMailer::new();
        mailer.send(&message()).await.unwrap();
        assert_eq!(mailer.sent(), vec![message()]);

        let failing = RecordingMailer::failing();
        assert!(failing.send(&message()).await.is_err());
        assert!(failing.sent().is_empty());
    }
}
