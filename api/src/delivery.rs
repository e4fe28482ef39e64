//! Outbound delivery: one-time codes over the SMS/WhatsApp carrier and
//! proactive pushes to the chat transport.

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use healthybites_core::conversation::Outbound;
use healthybites_core::profile::ConversationAddress;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const COUNTRY_PREFIX: &str = "+91";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery is not configured: {0}")]
    Unconfigured(String),
    #[error("no push address for conversation {0}")]
    NoAddress(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote rejected the message with {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OtpChannel {
    #[default]
    Sms,
    Whatsapp,
}

impl OtpChannel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sms" => Some(OtpChannel::Sms),
            "whatsapp" => Some(OtpChannel::Whatsapp),
            _ => None,
        }
    }
}

/// Carrier address for a 10-digit phone. Already-qualified inputs pass
/// through unchanged.
pub fn carrier_address(phone: &str, channel: OtpChannel) -> String {
    match channel {
        OtpChannel::Sms if phone.starts_with('+') => phone.to_string(),
        OtpChannel::Sms => format!("{COUNTRY_PREFIX}{phone}"),
        OtpChannel::Whatsapp if phone.starts_with("whatsapp:") => phone.to_string(),
        OtpChannel::Whatsapp => format!("whatsapp:{}", carrier_address(phone, OtpChannel::Sms)),
    }
}

/// "Deliver text to address" capability used by the OTP gate.
#[async_trait]
pub trait TextDelivery: Send + Sync {
    async fn deliver(
        &self,
        phone: &str,
        channel: OtpChannel,
        body: &str,
    ) -> Result<(), DeliveryError>;
}

pub struct TwilioDelivery {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    sms_from: String,
    whatsapp_from: String,
}

impl TwilioDelivery {
    pub fn new(
        account_sid: String,
        auth_token: String,
        sms_from: String,
        whatsapp_from: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
            sms_from,
            whatsapp_from,
        }
    }
}

#[async_trait]
impl TextDelivery for TwilioDelivery {
    async fn deliver(
        &self,
        phone: &str,
        channel: OtpChannel,
        body: &str,
    ) -> Result<(), DeliveryError> {
        let from = match channel {
            OtpChannel::Sms => self.sms_from.clone(),
            OtpChannel::Whatsapp => carrier_address(&self.whatsapp_from, OtpChannel::Whatsapp),
        };
        let to = carrier_address(phone, channel);
        let url = format!(
            "{TWILIO_API_BASE}/Accounts/{}/Messages.json",
            self.account_sid
        );

        let resp = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("From", from.as_str()), ("To", to.as_str()), ("Body", body)])
            .send()
            .await?;

        if resp.status().is_success() {
            tracing::info!(phone = %phone, ?channel, "OTP message accepted by carrier");
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        tracing::error!(phone = %phone, status, "carrier rejected OTP message");
        Err(DeliveryError::Rejected { status, body })
    }
}

/// Development delivery: writes the message to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogDelivery;

#[async_trait]
impl TextDelivery for LogDelivery {
    async fn deliver(
        &self,
        phone: &str,
        channel: OtpChannel,
        body: &str,
    ) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %carrier_address(phone, channel),
            body,
            "OTP delivery (log mode)"
        );
        Ok(())
    }
}

/// Proactive message push to a previously captured conversation address.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn push(
        &self,
        address: &ConversationAddress,
        messages: &[Outbound],
    ) -> Result<(), DeliveryError>;
}

#[derive(Serialize)]
struct PushBody<'a> {
    conversation_id: &'a str,
    messages: &'a [Outbound],
}

/// Posts outbound messages as JSON to the transport's service URL, or to a
/// configured fallback endpoint when the address carries none.
pub struct WebhookMessenger {
    client: reqwest::Client,
    fallback_url: Option<Url>,
}

impl WebhookMessenger {
    pub fn new(fallback_url: Option<Url>) -> Self {
        Self {
            client: reqwest::Client::new(),
            fallback_url,
        }
    }

    fn target(&self, address: &ConversationAddress) -> Result<Url, DeliveryError> {
        match address.service_url.as_deref() {
            Some(raw) => Url::parse(raw).map_err(|e| {
                DeliveryError::Unconfigured(format!("invalid service url '{raw}': {e}"))
            }),
            None => self
                .fallback_url
                .clone()
                .ok_or_else(|| DeliveryError::NoAddress(address.conversation_id.clone())),
        }
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn push(
        &self,
        address: &ConversationAddress,
        messages: &[Outbound],
    ) -> Result<(), DeliveryError> {
        let target = self.target(address)?;
        let resp = self
            .client
            .post(target)
            .json(&PushBody {
                conversation_id: &address.conversation_id,
                messages,
            })
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected { status, body })
    }
}
