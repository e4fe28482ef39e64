//! Conversation phases, inbound events and the outbound message model.
//!
//! Outbound cards are declarative documents; rendering them (adaptive cards,
//! quick replies, plain text fallbacks) is the transport's job.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::orders::Order;
use crate::profile::{DraftProfile, UserProfile};

/// The step a conversation is in. Variants carry exactly the data that step
/// needs, so a pending cancellation cannot lose its order id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    None,
    AskPhone,
    VerifyOtp,
    AskName,
    AskOffice,
    AskHome,
    AskHeard,
    AskUpdate,
    VerifyOtpUpdate,
    UpdateName,
    UpdateOffice,
    UpdateHome,
    UpdateHeard,
    VerifyOtpCancel { order_id: Uuid },
    ShowMenu,
    Complete,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::None => "none",
            Phase::AskPhone => "ask_phone",
            Phase::VerifyOtp => "verify_otp",
            Phase::AskName => "ask_name",
            Phase::AskOffice => "ask_office",
            Phase::AskHome => "ask_home",
            Phase::AskHeard => "ask_heard",
            Phase::AskUpdate => "ask_update",
            Phase::VerifyOtpUpdate => "verify_otp_update",
            Phase::UpdateName => "update_name",
            Phase::UpdateOffice => "update_office",
            Phase::UpdateHome => "update_home",
            Phase::UpdateHeard => "update_heard",
            Phase::VerifyOtpCancel { .. } => "verify_otp_cancel",
            Phase::ShowMenu => "show_menu",
            Phase::Complete => "complete",
        }
    }
}

/// Per-conversation state persisted between turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub conversation_id: String,
    #[serde(default)]
    pub phase: Phase,
    /// Phone proven via OTP in this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub draft: DraftProfile,
    #[serde(default)]
    pub welcomed: bool,
}

impl ConversationSession {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            ..Self::default()
        }
    }
}

/// Structured button payloads the transport forwards back to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundAction {
    RequestCancel { order_id: Uuid },
    ConfirmCancel { order_id: Uuid },
    KeepOrder,
    UpdateProfile,
    ResendOtp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InboundEvent {
    pub conversation_id: String,
    /// Transport endpoint for proactive pushes to this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<InboundAction>,
}

impl InboundEvent {
    /// Trimmed text, `None` when absent or blank.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Text { text: String },
    Markdown { text: String },
    Choice { prompt: String, options: Vec<String> },
    Card { card: Card },
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Outbound::Text { text: text.into() }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Outbound::Markdown { text: text.into() }
    }

    pub fn choice(prompt: impl Into<String>, options: &[&str]) -> Self {
        Outbound::Choice {
            prompt: prompt.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn card(card: Card) -> Self {
        Outbound::Card { card }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Card {
    ProfileSummary {
        name: String,
        phone: String,
        office_address: String,
        home_address: String,
        heard_from: String,
        referral_code: String,
    },
    OrderEntry {
        url: String,
    },
    OrderConfirmation {
        order_id: Uuid,
        items: Vec<String>,
        total: f64,
    },
    /// Yes/No prompt after the user asked to cancel.
    CancelConfirmation {
        order_id: Uuid,
        items: Vec<String>,
    },
    /// Proactive "you can still cancel" affordance.
    CancelOffer {
        order_id: Uuid,
        items: Vec<String>,
    },
    FeedbackRequest {
        order_id: Uuid,
        items: Vec<String>,
    },
}

impl Card {
    pub fn profile_summary(profile: &UserProfile) -> Self {
        Card::ProfileSummary {
            name: profile.name.clone(),
            phone: profile.phone.clone(),
            office_address: profile.office_address.clone(),
            home_address: profile.home_address.clone(),
            heard_from: profile.heard_from.clone(),
            referral_code: profile.referral_code.clone(),
        }
    }

    pub fn order_confirmation(order: &Order) -> Self {
        Card::OrderConfirmation {
            order_id: order.id,
            items: order.items.clone(),
            total: order.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trips_phase_payload() {
        let order_id = Uuid::now_v7();
        let session = ConversationSession {
            conversation_id: "conv-1".into(),
            phase: Phase::VerifyOtpCancel { order_id },
            phone: Some("9876543210".into()),
            draft: DraftProfile::for_phone("9876543210"),
            welcomed: true,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["phase"]["name"], "verify_otp_cancel");
        assert_eq!(json["phase"]["order_id"], order_id.to_string());
        let back: ConversationSession = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn inbound_action_uses_type_tag() {
        let raw = r#"{"conversation_id":"c","action":{"type":"update_profile"}}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.action, Some(InboundAction::UpdateProfile));
        assert_eq!(event.trimmed_text(), None);
    }

    #[test]
    fn blank_text_is_treated_as_absent() {
        let event = InboundEvent {
            conversation_id: "c".into(),
            text: Some("   ".into()),
            ..InboundEvent::default()
        };
        assert_eq!(event.trimmed_text(), None);
    }
}
