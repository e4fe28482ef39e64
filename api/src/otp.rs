//! One-time code issuance and verification with a per-phone sliding-window
//! attempt cap shared by send, resend and verify.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use healthybites_core::codes::{OTP_CODE_LENGTH, codes_match, generate_otp_code};

use crate::clock::Clock;
use crate::delivery::{DeliveryError, OtpChannel, TextDelivery};
use crate::locks::KeyedLocks;
use crate::store::{KeyValueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Too many OTP attempts. Please try again after {window_minutes} minutes.")]
    RateLimited { window_minutes: i64 },
    #[error("invalid or expired code")]
    Invalid,
    #[error("OTP delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct OtpSettings {
    pub max_attempts: usize,
    pub window: Duration,
    pub ttl: Duration,
    pub code_length: usize,
    pub channel: OtpChannel,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::minutes(30),
            ttl: Duration::minutes(5),
            code_length: OTP_CODE_LENGTH,
            channel: OtpChannel::Sms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Challenge {
    code: String,
    expires_at: DateTime<Utc>,
}

impl Challenge {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Drops attempts older than the trailing window.
pub fn prune_ledger(ledger: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    ledger.retain(|ts| now - *ts < window);
}

/// Whether a pruned ledger has used up its budget.
pub fn is_blocked(ledger: &[DateTime<Utc>], max_attempts: usize) -> bool {
    ledger.len() >= max_attempts
}

fn challenge_key(phone: &str) -> String {
    format!("otp:challenge:{phone}")
}

fn ledger_key(phone: &str) -> String {
    format!("otp:attempts:{phone}")
}

fn message_body(code: &str) -> String {
    format!("Your OTP for HealthyBites is: {code}")
}

pub struct OtpGate {
    kv: Arc<dyn KeyValueStore>,
    delivery: Arc<dyn TextDelivery>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    settings: OtpSettings,
}

impl OtpGate {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        delivery: Arc<dyn TextDelivery>,
        clock: Arc<dyn Clock>,
        settings: OtpSettings,
    ) -> Self {
        Self {
            kv,
            delivery,
            clock,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    pub fn default_channel(&self) -> OtpChannel {
        self.settings.channel
    }

    /// Issues a fresh code, replacing any live challenge for the phone.
    pub async fn send(&self, phone: &str, channel: OtpChannel) -> Result<(), OtpError> {
        let _guard = self.locks.acquire(&format!("otp:{phone}")).await;
        let now = self.clock.now();
        let mut ledger = self.admit(phone, now).await?;

        let challenge = self.issue(phone, now).await?;
        self.record(phone, &mut ledger, now).await?;
        self.dispatch(phone, channel, &challenge.code).await
    }

    /// Redelivers the live code if there is one, otherwise issues a new one.
    pub async fn resend(&self, phone: &str, channel: OtpChannel) -> Result<(), OtpError> {
        let _guard = self.locks.acquire(&format!("otp:{phone}")).await;
        let now = self.clock.now();
        let mut ledger = self.admit(phone, now).await?;

        let challenge = match self.live_challenge(phone, now).await? {
            Some(challenge) => challenge,
            None => self.issue(phone, now).await?,
        };
        self.record(phone, &mut ledger, now).await?;
        self.dispatch(phone, channel, &challenge.code).await
    }

    /// Checks a submitted code. A matching code is consumed.
    pub async fn verify(&self, phone: &str, code: &str) -> Result<(), OtpError> {
        let _guard = self.locks.acquire(&format!("otp:{phone}")).await;
        let now = self.clock.now();
        let mut ledger = self.admit(phone, now).await?;
        self.record(phone, &mut ledger, now).await?;

        let Some(challenge) = self.live_challenge(phone, now).await? else {
            return Err(OtpError::Invalid);
        };
        if !codes_match(&challenge.code, code.trim()) {
            return Err(OtpError::Invalid);
        }
        self.kv.delete(&challenge_key(phone)).await?;
        tracing::info!(phone = %phone, "OTP verified");
        Ok(())
    }

    /// Loads and prunes the ledger, rejecting when the budget is spent.
    async fn admit(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, OtpError> {
        let mut ledger: Vec<DateTime<Utc>> = match self.kv.get(&ledger_key(phone)).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(phone = %phone, error = %e, "discarding unreadable OTP ledger");
                Vec::new()
            }),
            None => Vec::new(),
        };
        prune_ledger(&mut ledger, now, self.settings.window);
        if is_blocked(&ledger, self.settings.max_attempts) {
            tracing::warn!(phone = %phone, attempts = ledger.len(), "OTP rate limit reached");
            return Err(OtpError::RateLimited {
                window_minutes: self.settings.window.num_minutes(),
            });
        }
        Ok(ledger)
    }

    async fn record(
        &self,
        phone: &str,
        ledger: &mut Vec<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), OtpError> {
        ledger.push(now);
        let raw = serde_json::to_string(ledger)
            .map_err(|e| StoreError::Corrupt(format!("OTP ledger for {phone}: {e}")))?;
        self.kv
            .set(&ledger_key(phone), &raw, Some(self.settings.window))
            .await?;
        Ok(())
    }

    async fn live_challenge(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Challenge>, OtpError> {
        let Some(raw) = self.kv.get(&challenge_key(phone)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Challenge>(&raw) {
            Ok(challenge) if challenge.is_live(now) => Ok(Some(challenge)),
            Ok(_) => {
                self.kv.delete(&challenge_key(phone)).await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(phone = %phone, error = %e, "discarding unreadable OTP challenge");
                self.kv.delete(&challenge_key(phone)).await?;
                Ok(None)
            }
        }
    }

    async fn issue(&self, phone: &str, now: DateTime<Utc>) -> Result<Challenge, OtpError> {
        let challenge = Challenge {
            code: generate_otp_code(self.settings.code_length),
            expires_at: now + self.settings.ttl,
        };
        let raw = serde_json::to_string(&challenge)
            .map_err(|e| StoreError::Corrupt(format!("OTP challenge for {phone}: {e}")))?;
        self.kv
            .set(&challenge_key(phone), &raw, Some(self.settings.ttl))
            .await?;
        Ok(challenge)
    }

    async fn dispatch(&self, phone: &str, channel: OtpChannel, code: &str) -> Result<(), OtpError> {
        self.delivery
            .deliver(phone, channel, &message_body(code))
            .await
            .map_err(|e| {
                tracing::error!(phone = %phone, error = %e, "OTP delivery failed");
                OtpError::Delivery(e)
            })
    }
}
