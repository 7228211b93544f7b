//! Outbound email provider client.
//!
//! The provider exposes a plain HTTP API: one POST per message with the
//! sender, recipient, subject and HTML body, authenticated by a static API
//! key header. The response carries a provider message id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use amicale_types::models::Org;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
}

/// Per-org branding: the sender identity and the header image embedded in
/// the mail template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgAssets {
    pub sender: SenderIdentity,
    pub header_image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub org_a: OrgAssets,
    pub org_b: OrgAssets,
}

fn default_base_url() -> String {
    "https://api.brevo.com".into()
}

impl MailConfig {
    pub fn assets_for(&self, org: Org) -> &OrgAssets {
        match org {
            Org::A => &self.org_a,
            Org::B => &self.org_b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub sender: SenderIdentity,
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected message ({status}): {message}")]
    Provider { status: u16, message: String },
}

/// Transport seam. The production implementation talks to the provider's
/// HTTP API; tests substitute a recording mock.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message; returns the provider message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, MailerError>;
}

pub struct EmailClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl EmailClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[derive(Serialize)]
struct ProviderAddress<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderSendRequest<'a> {
    sender: ProviderAddress<'a>,
    to: Vec<ProviderAddress<'a>>,
    subject: &'a str,
    html_content: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderSendResponse {
    message_id: String,
}

#[async_trait]
impl Mailer for EmailClient {
    async fn send(&self, email: &OutboundEmail) -> Result<String, MailerError> {
        let payload = ProviderSendRequest {
            sender: ProviderAddress {
                name: &email.sender.name,
                email: &email.sender.email,
            },
            to: vec![ProviderAddress {
                name: &email.to_name,
                email: &email.to_email,
            }],
            subject: &email.subject,
            html_content: &email.html,
        };

        let response = self
            .http
            .post(format!("{}/v3/smtp/email", self.base_url))
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MailerError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body: ProviderSendResponse = response.json().await?;
        Ok(body.message_id)
    }
}
