//! Reminder transports
//!
//! Email goes through Resend, SMS through Twilio. A transport that is not
//! configured reports every send as failed instead of erroring at startup.

use std::sync::Arc;

use async_trait::async_trait;
use duepay_shared::ReminderChannel;
use serde::Deserialize;

use crate::error::{BillingError, BillingResult};

const RESEND_BASE_URL: &str = "https://api.resend.com";
const TWILIO_BASE_URL: &str = "https://api.twilio.com";
const DEFAULT_EMAIL_FROM: &str = "Duepay <reminders@duepay.app>";

/// One rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    /// Used by email only
    pub subject: String,
    pub body: String,
}

/// Delivers messages over one channel
#[async_trait]
pub trait MessageTransport: Send + Sync {
    fn channel(&self) -> ReminderChannel;

    /// Send and return the provider's message id
    async fn send(&self, message: &OutboundMessage) -> BillingResult<String>;
}

/// The transport for each reminder channel
#[derive(Clone)]
pub struct Notifiers {
    pub email: Arc<dyn MessageTransport>,
    pub sms: Arc<dyn MessageTransport>,
}

impl Notifiers {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            email: Arc::new(ResendEmailTransport::from_env()?),
            sms: Arc::new(TwilioSmsTransport::from_env()?),
        })
    }

    pub fn for_channel(&self, channel: ReminderChannel) -> &dyn MessageTransport {
        match channel {
            ReminderChannel::Email => self.email.as_ref(),
            ReminderChannel::Sms => self.sms.as_ref(),
        }
    }
}

fn http_client() -> BillingResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| BillingError::Config(format!("failed to build HTTP client: {}", e)))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Email (Resend)
// =============================================================================

#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub from: String,
    pub base_url: String,
}

impl ResendConfig {
    /// `None` when `RESEND_API_KEY` is unset
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api_key: env_non_empty("RESEND_API_KEY")?,
            from: env_non_empty("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
            base_url: env_non_empty("RESEND_BASE_URL")
                .unwrap_or_else(|| RESEND_BASE_URL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
    message: Option<String>,
}

pub struct ResendEmailTransport {
    http: reqwest::Client,
    config: Option<ResendConfig>,
}

impl ResendEmailTransport {
    pub fn new(config: Option<ResendConfig>) -> BillingResult<Self> {
        Ok(Self {
            http: http_client()?,
            config,
        })
    }

    pub fn from_env() -> BillingResult<Self> {
        let config = ResendConfig::from_env();
        if config.is_none() {
            tracing::warn!("Email reminders not configured (missing RESEND_API_KEY)");
        }
        Self::new(config)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl MessageTransport for ResendEmailTransport {
    fn channel(&self) -> ReminderChannel {
        ReminderChannel::Email
    }

    async fn send(&self, message: &OutboundMessage) -> BillingResult<String> {
        let Some(config) = &self.config else {
            return Err(BillingError::Notification(
                "email transport not configured".to_string(),
            ));
        };

        let response = self
            .http
            .post(format!("{}/emails", config.base_url.trim_end_matches('/')))
            .bearer_auth(&config.api_key)
            .json(&serde_json::json!({
                "from": config.from,
                "to": [message.to],
                "subject": message.subject,
                "text": message.body,
            }))
            .send()
            .await
            .map_err(|e| BillingError::Notification(format!("email request failed: {}", e)))?;

        let status = response.status();
        let body: Option<ResendResponse> = response.json().await.ok();
        match body {
            Some(ResendResponse { id: Some(id), .. }) if status.is_success() => Ok(id),
            other => {
                let detail = other
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| "no message id returned".to_string());
                Err(BillingError::Notification(format!(
                    "email rejected ({}): {}",
                    status, detail
                )))
            }
        }
    }
}

// =============================================================================
// SMS (Twilio)
// =============================================================================

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub base_url: String,
}

impl TwilioConfig {
    /// `None` unless all three Twilio variables are set
    pub fn from_env() -> Option<Self> {
        Some(Self {
            account_sid: env_non_empty("TWILIO_ACCOUNT_SID")?,
            auth_token: env_non_empty("TWILIO_AUTH_TOKEN")?,
            from_number: env_non_empty("TWILIO_FROM_NUMBER")?,
            base_url: env_non_empty("TWILIO_BASE_URL")
                .unwrap_or_else(|| TWILIO_BASE_URL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TwilioResponse {
    sid: Option<String>,
    message: Option<String>,
}

pub struct TwilioSmsTransport {
    http: reqwest::Client,
    config: Option<TwilioConfig>,
}

impl TwilioSmsTransport {
    pub fn new(config: Option<TwilioConfig>) -> BillingResult<Self> {
        Ok(Self {
            http: http_client()?,
            config,
        })
    }

    pub fn from_env() -> BillingResult<Self> {
        let config = TwilioConfig::from_env();
        if config.is_none() {
            tracing::warn!("SMS reminders not configured (missing TWILIO_* settings)");
        }
        Self::new(config)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl MessageTransport for TwilioSmsTransport {
    fn channel(&self) -> ReminderChannel {
        ReminderChannel::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> BillingResult<String> {
        let Some(config) = &self.config else {
            return Err(BillingError::Notification(
                "sms transport not configured".to_string(),
            ));
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            config.base_url.trim_end_matches('/'),
            config.account_sid
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&config.account_sid, Some(&config.auth_token))
            .form(&[
                ("To", message.to.as_str()),
                ("From", config.from_number.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BillingError::Notification(format!("sms request failed: {}", e)))?;

        let status = response.status();
        let body: Option<TwilioResponse> = response.json().await.ok();
        match body {
            Some(TwilioResponse { sid: Some(sid), .. }) if status.is_success() => Ok(sid),
            other => {
                let detail = other
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| "no message sid returned".to_string());
                Err(BillingError::Notification(format!(
                    "sms rejected ({}): {}",
                    status, detail
                )))
            }
        }
    }
}

// =============================================================================
// Test transport
// =============================================================================

/// Records every message; optionally fails every send
#[cfg(any(test, feature = "test-store"))]
pub struct RecordingTransport {
    channel: ReminderChannel,
    fail: bool,
    sent: tokio::sync::Mutex<Vec<OutboundMessage>>,
}

#[cfg(any(test, feature = "test-store"))]
impl RecordingTransport {
    pub fn new(channel: ReminderChannel) -> Self {
        Self {
            channel,
            fail: false,
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(channel: ReminderChannel) -> Self {
        Self {
            fail: true,
            ..Self::new(channel)
        }
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[cfg(any(test, feature = "test-store"))]
#[async_trait]
impl MessageTransport for RecordingTransport {
    fn channel(&self) -> ReminderChannel {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> BillingResult<String> {
        self.sent.lock().await.push(message.clone());
        if self.fail {
            return Err(BillingError::Notification("provider unavailable".to_string()));
        }
        Ok(format!("test-{}", self.sent.lock().await.len()))
    }
}
