use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use url::Url;

use healthybites_core::menu::Menu;

use crate::delivery::OtpChannel;
use crate::otp::OtpSettings;

const DEFAULT_BASE_URL: &str = "http://localhost:3978";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when {1}")]
    Missing(&'static str, &'static str),
}

#[derive(Debug, Clone)]
pub enum OtpDeliveryMode {
    Twilio {
        account_sid: String,
        auth_token: String,
        sms_from: String,
        whatsapp_from: String,
    },
    /// Codes are written to the log.
    Log,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub timezone: Tz,
    pub public_base_url: Url,
    pub cors_origins: Vec<String>,
    pub menu_path: PathBuf,
    pub otp: OtpSettings,
    pub otp_delivery: OtpDeliveryMode,
    pub transport_push_url: Option<Url>,
    pub proactive_timeout: StdDuration,
    pub scheduler_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Builds the config from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(lookup);

        let channel = match env.get("HB_OTP_CHANNEL") {
            Some(raw) => OtpChannel::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "HB_OTP_CHANNEL",
                value: raw,
                reason: "expected 'sms' or 'whatsapp'".into(),
            })?,
            None => OtpChannel::Sms,
        };
        let defaults = OtpSettings::default();
        let otp = OtpSettings {
            max_attempts: env.parse("HB_OTP_MAX_ATTEMPTS", defaults.max_attempts)?,
            window: Duration::minutes(
                env.parse("HB_OTP_WINDOW_MINUTES", defaults.window.num_minutes())?,
            ),
            ttl: Duration::minutes(env.parse("HB_OTP_TTL_MINUTES", defaults.ttl.num_minutes())?),
            code_length: defaults.code_length,
            channel,
        };

        let timezone = match env.get("HB_TIMEZONE") {
            Some(raw) => raw.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                key: "HB_TIMEZONE",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => chrono_tz::Asia::Kolkata,
        };

        let public_base_url = match env.url("HB_PUBLIC_BASE_URL")? {
            Some(url) => url,
            None => Url::parse(DEFAULT_BASE_URL).map_err(|e| ConfigError::Invalid {
                key: "HB_PUBLIC_BASE_URL",
                value: DEFAULT_BASE_URL.into(),
                reason: e.to_string(),
            })?,
        };
        let cors_origins = match env.get("HB_CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![public_base_url.origin().ascii_serialization()],
        };

        Ok(Self {
            port: env.parse("PORT", 3978)?,
            database_url: env.get("DATABASE_URL"),
            timezone,
            public_base_url,
            cors_origins,
            menu_path: env
                .get("HB_MENU_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public/menu.json")),
            otp,
            otp_delivery: otp_delivery(&env)?,
            transport_push_url: env.url("HB_TRANSPORT_PUSH_URL")?,
            proactive_timeout: StdDuration::from_secs(env.parse("HB_PROACTIVE_TIMEOUT_SECS", 5)?),
            scheduler_enabled: env.parse("HB_SCHEDULER_ENABLED", true)?,
        })
    }
}

fn otp_delivery<F: Fn(&str) -> Option<String>>(
    env: &Lookup<F>,
) -> Result<OtpDeliveryMode, ConfigError> {
    let mode = env.get("HB_OTP_DELIVERY").unwrap_or_else(|| {
        if env.get("TWILIO_ACCOUNT_SID").is_some() {
            "twilio".to_string()
        } else {
            "log".to_string()
        }
    });
    match mode.to_lowercase().as_str() {
        "log" => Ok(OtpDeliveryMode::Log),
        "twilio" => {
            let required = |key: &'static str| {
                env.get(key)
                    .ok_or(ConfigError::Missing(key, "HB_OTP_DELIVERY=twilio"))
            };
            let sms_from = required("TWILIO_FROM_NUMBER")?;
            Ok(OtpDeliveryMode::Twilio {
                account_sid: required("TWILIO_ACCOUNT_SID")?,
                auth_token: required("TWILIO_AUTH_TOKEN")?,
                whatsapp_from: env.get("TWILIO_WHATSAPP_FROM").unwrap_or_else(|| sms_from.clone()),
                sms_from,
            })
        }
        _ => Err(ConfigError::Invalid {
            key: "HB_OTP_DELIVERY",
            value: mode,
            reason: "expected 'twilio' or 'log'".into(),
        }),
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn url(&self, key: &'static str) -> Result<Option<Url>, ConfigError> {
        self.get(key)
            .map(|raw| {
                Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

/// Reads the menu file, falling back to the built-in menu when it is missing
/// or malformed.
pub fn load_menu(path: &Path) -> Menu {
    match std::fs::read_to_string(path) {
        Ok(raw) => match Menu::from_json(&raw) {
            Ok(menu) => menu,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "menu file is malformed, using built-in menu");
                Menu::fallback()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "menu file not readable, using built-in menu");
            Menu::fallback()
        }
    }
}
