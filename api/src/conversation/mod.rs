//! Per-conversation state machine. One inbound event is one turn: load the
//! session, run the guards, dispatch on the phase, save the session.

pub mod guards;
pub mod replies;

#[cfg(test)]
mod scenario_tests;

use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use healthybites_core::codes::referral_code_candidate;
use healthybites_core::conversation::{
    Card, ConversationSession, InboundAction, InboundEvent, Outbound, Phase,
};
use healthybites_core::menu::Menu;
use healthybites_core::profile::{ConversationAddress, DraftProfile, UserProfile, is_valid_phone};
use healthybites_core::windows::TimeWindowPolicy;

use crate::clock::Clock;
use crate::lifecycle::{LifecycleError, OrderLifecycle};
use crate::locks::{KeyedLocks, conversation_key, phone_key};
use crate::otp::{OtpError, OtpGate};
use crate::store::{KeyValueStore, Store, StoreError};

use guards::{Guard, GuardInput};
use replies::*;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Key of the one-shot "order received" notice for a phone.
pub fn order_notice_key(phone: &str) -> String {
    format!("order_notice:{phone}")
}

pub struct EngineSettings {
    pub policy: TimeWindowPolicy,
    pub menu: Arc<Menu>,
    pub public_base_url: Url,
}

enum Flow {
    Handled,
    Continue,
}

pub struct ConversationEngine {
    store: Arc<dyn Store>,
    kv: Arc<dyn KeyValueStore>,
    otp: Arc<OtpGate>,
    lifecycle: Arc<OrderLifecycle>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        kv: Arc<dyn KeyValueStore>,
        otp: Arc<OtpGate>,
        lifecycle: Arc<OrderLifecycle>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyedLocks>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            kv,
            otp,
            lifecycle,
            clock,
            locks,
            settings,
        }
    }

    /// Runs one turn. Never fails: errors become a single apology message
    /// and whatever the turn changed before the failure is kept.
    pub async fn handle_event(&self, event: &InboundEvent) -> Vec<Outbound> {
        let _conversation = self
            .locks
            .acquire(&conversation_key(&event.conversation_id))
            .await;

        let mut session = match self.store.load_session(&event.conversation_id).await {
            Ok(Some(session)) => session,
            Ok(None) => ConversationSession::new(&event.conversation_id),
            Err(StoreError::Corrupt(reason)) => {
                tracing::warn!(
                    conversation_id = %event.conversation_id,
                    reason = %reason,
                    "starting over from an unreadable session"
                );
                ConversationSession::new(&event.conversation_id)
            }
            Err(err) => {
                tracing::error!(
                    conversation_id = %event.conversation_id,
                    error = %err,
                    "failed to load session"
                );
                return vec![Outbound::text(SOMETHING_WENT_WRONG)];
            }
        };

        let phone = session.phone.clone().or_else(|| session.draft.phone.clone());
        let _phone = match &phone {
            Some(phone) => Some(self.locks.acquire(&phone_key(phone)).await),
            None => None,
        };

        let mut out = Vec::new();
        let turn = self.run_turn(&mut session, event, &mut out).await;
        if let Err(err) = &turn {
            tracing::error!(
                conversation_id = %event.conversation_id,
                phase = session.phase.name(),
                error = %err,
                "conversation turn failed"
            );
            out.push(Outbound::text(SOMETHING_WENT_WRONG));
        }

        if let Err(err) = self.store.save_session(&session).await {
            tracing::error!(
                conversation_id = %event.conversation_id,
                error = %err,
                "failed to save session"
            );
            if turn.is_ok() {
                out.push(Outbound::text(SOMETHING_WENT_WRONG));
            }
        }
        out
    }

    async fn run_turn(
        &self,
        session: &mut ConversationSession,
        event: &InboundEvent,
        out: &mut Vec<Outbound>,
    ) -> Result<(), EngineError> {
        if !session.welcomed {
            out.push(Outbound::text(WELCOME));
            session.welcomed = true;
        }

        if let Some(phone) = session.phone.clone() {
            self.remember_address(&phone, event).await;
            if let Some(notice) = self.kv.take(&order_notice_key(&phone)).await? {
                out.push(Outbound::text(ORDER_RECEIVED));
                self.confirm_noticed_order(&phone, &notice, out).await?;
            }
        }

        let matched: Vec<Guard> = {
            let input = GuardInput {
                phase: &session.phase,
                text: event.trimmed_text(),
                action: event.action.as_ref(),
                feedback_window: self.settings.policy.feedback_open(self.clock.now()),
            };
            guards::matching(&input).collect()
        };
        for guard in matched {
            if let Flow::Handled = self.apply_guard(guard, session, event, out).await? {
                return Ok(());
            }
        }

        self.dispatch(session, event, out).await
    }

    /// Follows the "order received" notice with the order's confirmation card.
    /// The notice holds the order id; orders of another phone are ignored.
    async fn confirm_noticed_order(
        &self,
        phone: &str,
        notice: &str,
        out: &mut Vec<Outbound>,
    ) -> Result<(), EngineError> {
        let Ok(order_id) = notice.parse::<Uuid>() else {
            tracing::warn!(phone = %phone, notice = %notice, "order notice without an order id");
            return Ok(());
        };
        match self.store.get_order(order_id).await? {
            Some(order) if order.phone == phone => {
                out.push(Outbound::card(Card::order_confirmation(&order)));
            }
            _ => tracing::warn!(phone = %phone, order_id = %order_id, "noticed order not found"),
        }
        Ok(())
    }

    async fn apply_guard(
        &self,
        guard: Guard,
        session: &mut ConversationSession,
        event: &InboundEvent,
        out: &mut Vec<Outbound>,
    ) -> Result<Flow, EngineError> {
        match guard {
            Guard::FeedbackCapture => {
                let (Some(phone), Some(text)) = (session.phone.as_deref(), event.trimmed_text())
                else {
                    return Ok(Flow::Continue);
                };
                match self.lifecycle.attach_feedback(phone, text).await? {
                    Some(_) => {
                        out.push(Outbound::text(FEEDBACK_THANKS));
                        Ok(Flow::Handled)
                    }
                    None => Ok(Flow::Continue),
                }
            }
            Guard::CancelRequest => {
                if let Some(action) = &event.action {
                    self.cancel_action(session, action, out).await?;
                }
                Ok(Flow::Handled)
            }
            Guard::ProfileUpdate => self.begin_profile_update(session, out).await,
        }
    }

    async fn cancel_action(
        &self,
        session: &mut ConversationSession,
        action: &InboundAction,
        out: &mut Vec<Outbound>,
    ) -> Result<(), EngineError> {
        match action {
            InboundAction::KeepOrder => out.push(Outbound::text(ORDER_KEPT)),
            InboundAction::RequestCancel { order_id } => {
                match self.lifecycle.check_cancelable(*order_id).await {
                    Ok(order) => {
                        out.push(Outbound::text(CANCEL_PROMPT));
                        out.push(Outbound::card(Card::CancelConfirmation {
                            order_id: order.id,
                            items: order.items,
                        }));
                    }
                    Err(err) => out.push(cancel_refusal(err)?),
                }
            }
            InboundAction::ConfirmCancel { order_id } => {
                match self.lifecycle.check_cancelable(*order_id).await {
                    Ok(order) => match self.otp.send(&order.phone, self.otp.default_channel()).await
                    {
                        Ok(()) => {
                            session.phase = Phase::VerifyOtpCancel { order_id: order.id };
                            out.push(resend_choice(OTP_SENT_CANCEL));
                        }
                        Err(err) => out.push(otp_failure(err)?),
                    },
                    Err(err) => out.push(cancel_refusal(err)?),
                }
            }
            InboundAction::UpdateProfile | InboundAction::ResendOtp => {}
        }
        Ok(())
    }

    async fn begin_profile_update(
        &self,
        session: &mut ConversationSession,
        out: &mut Vec<Outbound>,
    ) -> Result<Flow, EngineError> {
        let Some(phone) = session.phone.clone().or_else(|| session.draft.phone.clone()) else {
            return Ok(Flow::Continue);
        };
        session.draft = match self.store.get_profile(&phone).await? {
            Some(profile) => DraftProfile::from_profile(&profile),
            None => DraftProfile::for_phone(&phone),
        };
        match self.otp.send(&phone, self.otp.default_channel()).await {
            Ok(()) => {
                session.phase = Phase::VerifyOtpUpdate;
                out.push(resend_choice(OTP_SENT_UPDATE));
            }
            Err(err) => out.push(otp_failure(err)?),
        }
        Ok(Flow::Handled)
    }

    async fn dispatch(
        &self,
        session: &mut ConversationSession,
        event: &InboundEvent,
        out: &mut Vec<Outbound>,
    ) -> Result<(), EngineError> {
        let text = event.trimmed_text();
        match session.phase.clone() {
            Phase::None => {
                out.push(Outbound::text(ASK_PHONE));
                session.phase = Phase::AskPhone;
            }
            Phase::AskPhone => match text {
                Some(input) if is_valid_phone(input) => {
                    session.draft = DraftProfile::for_phone(input);
                    match self.otp.send(input, self.otp.default_channel()).await {
                        Ok(()) => {
                            session.phase = Phase::VerifyOtp;
                            out.push(resend_choice(OTP_SENT));
                        }
                        Err(err) => out.push(otp_failure(err)?),
                    }
                }
                _ => out.push(Outbound::text(INVALID_PHONE)),
            },
            Phase::VerifyOtp | Phase::VerifyOtpUpdate | Phase::VerifyOtpCancel { .. } => {
                self.verify_step(session, event, out).await?;
            }
            Phase::AskUpdate => match text {
                Some(answer) if answer.eq_ignore_ascii_case("no") => {
                    out.push(Outbound::text(PROFILE_UNCHANGED));
                    session.draft = DraftProfile::default();
                    session.phase = Phase::ShowMenu;
                    self.show_menu(session, out);
                }
                _ => out.push(yes_no(ASK_UPDATE)),
            },
            phase @ (Phase::AskName
            | Phase::AskOffice
            | Phase::AskHome
            | Phase::UpdateName
            | Phase::UpdateOffice
            | Phase::UpdateHome) => match text {
                Some(answer) => collect_answer(session, &phase, answer, out),
                None => out.push(question(&phase)),
            },
            phase @ (Phase::AskHeard | Phase::UpdateHeard) => match text {
                Some(answer) => {
                    session.draft.heard_from = Some(answer.to_string());
                    self.commit_profile(session, event, phase == Phase::AskHeard, out)
                        .await?;
                }
                None => out.push(heard_choice()),
            },
            Phase::ShowMenu | Phase::Complete => self.show_menu(session, out),
        }
        Ok(())
    }

    async fn verify_step(
        &self,
        session: &mut ConversationSession,
        event: &InboundEvent,
        out: &mut Vec<Outbound>,
    ) -> Result<(), EngineError> {
        let phase = session.phase.clone();
        let phone = match &phase {
            Phase::VerifyOtpCancel { order_id } => match self.store.get_order(*order_id).await? {
                Some(order) => order.phone,
                None => {
                    out.push(Outbound::text(ORDER_NOT_FOUND));
                    session.phase = Phase::ShowMenu;
                    return Ok(());
                }
            },
            _ => match session.draft.phone.clone().or_else(|| session.phone.clone()) {
                Some(phone) => phone,
                None => {
                    out.push(Outbound::text(ASK_PHONE));
                    session.phase = Phase::AskPhone;
                    return Ok(());
                }
            },
        };

        let text = event.trimmed_text();
        let wants_resend = matches!(event.action, Some(InboundAction::ResendOtp))
            || text.is_some_and(|t| t.eq_ignore_ascii_case(RESEND_COMMAND));
        if wants_resend {
            match self.otp.resend(&phone, self.otp.default_channel()).await {
                Ok(()) => out.push(resend_choice(OTP_RESENT)),
                Err(err) => out.push(otp_failure(err)?),
            }
            return Ok(());
        }

        let Some(code) = text else {
            out.push(resend_choice(OTP_PROMPT));
            return Ok(());
        };
        if let Err(err) = self.otp.verify(&phone, code).await {
            out.push(otp_failure(err)?);
            return Ok(());
        }

        match phase {
            Phase::VerifyOtp => {
                session.phone = Some(phone.clone());
                match self.store.get_profile(&phone).await? {
                    Some(profile) => {
                        session.draft = DraftProfile::from_profile(&profile);
                        out.push(Outbound::text(WELCOME_BACK));
                        out.push(Outbound::card(Card::profile_summary(&profile)));
                        out.push(yes_no(ASK_UPDATE));
                        session.phase = Phase::AskUpdate;
                    }
                    None => {
                        out.push(Outbound::text(ASK_NAME));
                        session.phase = Phase::AskName;
                    }
                }
            }
            Phase::VerifyOtpUpdate => {
                session.phone = Some(phone);
                out.push(Outbound::text(ASK_NAME_UPDATE));
                session.phase = Phase::UpdateName;
            }
            Phase::VerifyOtpCancel { order_id } => {
                session.phase = Phase::ShowMenu;
                match self.lifecycle.cancel(order_id, &phone).await {
                    Ok(_) => out.push(Outbound::text(ORDER_CANCELED)),
                    Err(err) => out.push(cancel_refusal(err)?),
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Persists the draft as a new profile or onto the existing one.
    async fn commit_profile(
        &self,
        session: &mut ConversationSession,
        event: &InboundEvent,
        onboarding: bool,
        out: &mut Vec<Outbound>,
    ) -> Result<(), EngineError> {
        let Some(phone) = session.phone.clone() else {
            out.push(Outbound::text(ASK_PHONE));
            session.phase = Phase::AskPhone;
            return Ok(());
        };

        let profile = match self.store.get_profile(&phone).await? {
            Some(mut existing) => {
                existing.apply_draft(&session.draft);
                self.store.update_profile(&existing).await?;
                tracing::info!(phone = %phone, "profile updated");
                existing
            }
            None => {
                self.create_profile(&phone, &session.draft, address_of(event))
                    .await?
            }
        };

        out.push(Outbound::text(if onboarding {
            PROFILE_CREATED
        } else {
            PROFILE_UPDATED
        }));
        out.push(Outbound::card(Card::profile_summary(&profile)));
        session.draft = DraftProfile::default();
        session.phase = Phase::ShowMenu;
        self.show_menu(session, out);
        Ok(())
    }

    /// Inserts a profile under a referral code no other profile holds,
    /// drawing new candidates until one is free.
    async fn create_profile(
        &self,
        phone: &str,
        draft: &DraftProfile,
        address: ConversationAddress,
    ) -> Result<UserProfile, StoreError> {
        loop {
            let code = referral_code_candidate(phone);
            if self.store.referral_code_exists(&code).await? {
                continue;
            }
            let mut profile = UserProfile::from_draft(phone, draft, code);
            profile.conversation_address = Some(address.clone());
            match self.store.insert_profile(&profile).await {
                Ok(()) => {
                    tracing::info!(phone = %phone, referral_code = %profile.referral_code, "profile created");
                    return Ok(profile);
                }
                Err(StoreError::Conflict { field }) if field == "referral_code" => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Records where proactive messages for this phone should go. Failure
    /// only costs proactive delivery, so it is logged and the turn goes on.
    async fn remember_address(&self, phone: &str, event: &InboundEvent) {
        let address = address_of(event);
        match self.store.get_profile(phone).await {
            Ok(Some(mut profile)) if profile.conversation_address.as_ref() != Some(&address) => {
                profile.conversation_address = Some(address);
                if let Err(err) = self.store.update_profile(&profile).await {
                    tracing::warn!(phone = %phone, error = %err, "failed to record conversation address");
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(phone = %phone, error = %err, "failed to load profile for address capture");
            }
        }
    }

    fn show_menu(&self, session: &ConversationSession, out: &mut Vec<Outbound>) {
        if self
            .settings
            .policy
            .ordering_open(self.clock.now())
            .is_some()
        {
            let phone = session.phone.as_deref().unwrap_or_default();
            out.extend(menu_with_order_entry(
                &self.settings.menu,
                &self.settings.public_base_url,
                phone,
            ));
        } else {
            out.push(ordering_closed());
        }
    }
}

fn address_of(event: &InboundEvent) -> ConversationAddress {
    ConversationAddress {
        conversation_id: event.conversation_id.clone(),
        service_url: event.service_url.clone(),
    }
}

fn question(phase: &Phase) -> Outbound {
    match phase {
        Phase::AskName => Outbound::text(ASK_NAME),
        Phase::UpdateName => Outbound::text(ASK_NAME_UPDATE),
        Phase::AskOffice | Phase::UpdateOffice => Outbound::text(ASK_OFFICE),
        Phase::AskHome | Phase::UpdateHome => Outbound::text(ASK_HOME),
        Phase::AskHeard | Phase::UpdateHeard => heard_choice(),
        _ => Outbound::text(ASK_PHONE),
    }
}

/// Stores a verbatim answer and moves to the next question of the chain.
fn collect_answer(
    session: &mut ConversationSession,
    phase: &Phase,
    answer: &str,
    out: &mut Vec<Outbound>,
) {
    let answer = Some(answer.to_string());
    let next = match phase {
        Phase::AskName => {
            session.draft.name = answer;
            Phase::AskOffice
        }
        Phase::UpdateName => {
            session.draft.name = answer;
            Phase::UpdateOffice
        }
        Phase::AskOffice => {
            session.draft.office_address = answer;
            Phase::AskHome
        }
        Phase::UpdateOffice => {
            session.draft.office_address = answer;
            Phase::UpdateHome
        }
        Phase::AskHome => {
            session.draft.home_address = answer;
            Phase::AskHeard
        }
        Phase::UpdateHome => {
            session.draft.home_address = answer;
            Phase::UpdateHeard
        }
        _ => return,
    };
    out.push(question(&next));
    session.phase = next;
}

fn otp_failure(err: OtpError) -> Result<Outbound, EngineError> {
    match err {
        OtpError::RateLimited { .. } => Ok(Outbound::text(err.to_string())),
        OtpError::Invalid => Ok(resend_choice(OTP_WRONG)),
        OtpError::Delivery(_) => Ok(Outbound::text(OTP_SEND_FAILED)),
        OtpError::Store(err) => Err(err.into()),
    }
}

fn cancel_refusal(err: LifecycleError) -> Result<Outbound, EngineError> {
    match err {
        LifecycleError::WindowClosed { .. } => Ok(Outbound::text(err.to_string())),
        LifecycleError::InvalidTransition { .. } => Ok(Outbound::text(ORDER_NOT_CANCELABLE)),
        LifecycleError::NotFound(_) | LifecycleError::Validation(_) => {
            Ok(Outbound::text(ORDER_NOT_FOUND))
        }
        LifecycleError::Store(err) => Err(err.into()),
    }
}
