use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use tokio::sync::Notify;
use url::Url;
use uuid::Uuid;

use healthybites_core::conversation::{
    Card, ConversationSession, InboundAction, InboundEvent, Outbound, Phase,
};
use healthybites_core::menu::Menu;
use healthybites_core::orders::{NewOrder, Order, OrderStatus};
use healthybites_core::profile::{DraftProfile, MealType, UserProfile};
use healthybites_core::windows::TimeWindowPolicy;

use super::replies::*;
use super::{ConversationEngine, EngineSettings, order_notice_key};
use crate::clock::{Clock, ManualClock};
use crate::delivery::testing::{PushMode, RecordingDelivery, RecordingMessenger};
use crate::lifecycle::OrderLifecycle;
use crate::locks::KeyedLocks;
use crate::otp::{OtpGate, OtpSettings};
use crate::scheduler::{Job, NotificationScheduler, SchedulerSettings};
use crate::store::{
    KeyValueStore, MemoryKeyValueStore, MemoryStore, OrderStore, ProfileStore, SessionStore,
    Store, StoreError,
};

const PHONE: &str = "9876543210";
const CONV: &str = "conv-1";

fn ist(hour: u32, minute: u32) -> DateTime<Utc> {
    Kolkata
        .with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// The store as the engine sees it. Session saves can be slowed down so a
/// turn stays in flight, and profile inserts can be made to fail.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    save_delay: Option<StdDuration>,
    save_started: Notify,
    fail_profile_inserts: AtomicBool,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryStore>, save_delay: Option<StdDuration>) -> Self {
        Self {
            inner,
            save_delay,
            save_started: Notify::new(),
            fail_profile_inserts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProfileStore for FaultyStore {
    async fn get_profile(&self, phone: &str) -> Result<Option<UserProfile>, StoreError> {
        self.inner.get_profile(phone).await
    }

    async fn insert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        if self.fail_profile_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.inner.update_profile(profile).await
    }

    async fn referral_code_exists(&self, code: &str) -> Result<bool, StoreError> {
        self.inner.referral_code_exists(code).await
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        self.inner.list_profiles().await
    }
}

#[async_trait]
impl OrderStore for FaultyStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.inner.insert_order(order).await
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.inner.get_order(id).await
    }

    async fn transition_order(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        self.inner.transition_order(id, from, to).await
    }

    async fn set_feedback(&self, id: Uuid, feedback: &str) -> Result<bool, StoreError> {
        self.inner.set_feedback(id, feedback).await
    }

    async fn has_pending_order(&self, phone: &str) -> Result<bool, StoreError> {
        self.inner.has_pending_order(phone).await
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        self.inner.pending_orders().await
    }

    async fn pending_orders_placed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        self.inner.pending_orders_placed_between(from, until).await
    }

    async fn latest_delivered_without_feedback(
        &self,
        phone: &str,
    ) -> Result<Option<Order>, StoreError> {
        self.inner.latest_delivered_without_feedback(phone).await
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn load_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSession>, StoreError> {
        self.inner.load_session(conversation_id).await
    }

    async fn save_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        self.save_started.notify_one();
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.save_session(session).await
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

struct Harness {
    engine: ConversationEngine,
    store: Arc<MemoryStore>,
    faulty: Arc<FaultyStore>,
    kv: Arc<MemoryKeyValueStore>,
    clock: Arc<ManualClock>,
    delivery: Arc<RecordingDelivery>,
    lifecycle: Arc<OrderLifecycle>,
    locks: Arc<KeyedLocks>,
    policy: TimeWindowPolicy,
}

impl Harness {
    fn new(now: DateTime<Utc>) -> Self {
        Self::with_otp(now, OtpSettings::default())
    }

    fn with_otp(now: DateTime<Utc>, otp_settings: OtpSettings) -> Self {
        Self::build(now, otp_settings, RecordingDelivery::default(), None)
    }

    /// Every OTP delivery fails.
    fn with_failing_delivery(now: DateTime<Utc>) -> Self {
        Self::build(now, OtpSettings::default(), RecordingDelivery::failing(), None)
    }

    /// Each session save of the engine takes `delay`.
    fn with_slow_saves(now: DateTime<Utc>, delay: StdDuration) -> Self {
        Self::build(now, OtpSettings::default(), RecordingDelivery::default(), Some(delay))
    }

    fn build(
        now: DateTime<Utc>,
        otp_settings: OtpSettings,
        delivery: RecordingDelivery,
        save_delay: Option<StdDuration>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::new());
        let faulty = Arc::new(FaultyStore::new(store.clone(), save_delay));
        let kv = Arc::new(MemoryKeyValueStore::new(clock.clone()));
        let delivery = Arc::new(delivery);
        let locks = Arc::new(KeyedLocks::new());
        let policy = TimeWindowPolicy::new(Kolkata);
        let otp = Arc::new(OtpGate::new(
            kv.clone(),
            delivery.clone(),
            clock.clone(),
            otp_settings,
        ));
        let lifecycle = Arc::new(OrderLifecycle::new(store.clone(), policy, clock.clone()));
        let engine = ConversationEngine::new(
            faulty.clone(),
            kv.clone(),
            otp,
            lifecycle.clone(),
            clock.clone(),
            locks.clone(),
            EngineSettings {
                policy,
                menu: Arc::new(Menu::fallback()),
                public_base_url: Url::parse("http://localhost:3978").unwrap(),
            },
        );
        Self {
            engine,
            store,
            faulty,
            kv,
            clock,
            delivery,
            lifecycle,
            locks,
            policy,
        }
    }

    /// A scheduler sharing this harness's store, lifecycle and locks.
    fn scheduler(&self) -> NotificationScheduler {
        NotificationScheduler::new(
            self.store.clone(),
            self.lifecycle.clone(),
            Arc::new(RecordingMessenger::with_mode(PushMode::Accept)),
            self.clock.clone(),
            self.locks.clone(),
            SchedulerSettings {
                policy: self.policy,
                menu: Arc::new(Menu::fallback()),
                public_base_url: Url::parse("http://localhost:3978").unwrap(),
                proactive_timeout: StdDuration::from_millis(20),
            },
        )
    }

    async fn say(&self, text: &str) -> Vec<Outbound> {
        self.engine
            .handle_event(&InboundEvent {
                conversation_id: CONV.into(),
                service_url: Some("http://transport/push".into()),
                text: Some(text.into()),
                action: None,
            })
            .await
    }

    async fn act(&self, action: InboundAction) -> Vec<Outbound> {
        self.engine
            .handle_event(&InboundEvent {
                conversation_id: CONV.into(),
                service_url: Some("http://transport/push".into()),
                text: None,
                action: Some(action),
            })
            .await
    }

    async fn phase(&self) -> Phase {
        self.store
            .load_session(CONV)
            .await
            .unwrap()
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    fn last_code(&self) -> String {
        self.delivery.last_code(PHONE).expect("an OTP was sent")
    }

    /// Drives a fresh conversation up to a verified phone.
    async fn verify_phone(&self) -> Vec<Outbound> {
        self.say("hi").await;
        self.say(PHONE).await;
        let code = self.last_code();
        self.say(&code).await
    }

    async fn seed_profile(&self) -> UserProfile {
        let draft = DraftProfile {
            phone: Some(PHONE.into()),
            name: Some("Asha".into()),
            office_address: Some("Tower B, Cyber City".into()),
            home_address: Some("12 MG Road".into()),
            heard_from: Some("Friend".into()),
        };
        let profile = UserProfile::from_draft(PHONE, &draft, "HB10123".into());
        self.store.insert_profile(&profile).await.unwrap();
        profile
    }

    /// Puts the conversation into the idle phase with a verified phone.
    async fn seed_idle_session(&self) {
        let mut session = ConversationSession::new(CONV);
        session.phase = Phase::ShowMenu;
        session.phone = Some(PHONE.into());
        session.welcomed = true;
        self.store.save_session(&session).await.unwrap();
    }

    async fn place_order_at(&self, at: DateTime<Utc>) -> uuid::Uuid {
        let now = self.clock.now();
        self.clock.set(at);
        let order = self
            .lifecycle
            .create(NewOrder {
                phone: PHONE.into(),
                items: vec!["Dal Tadka Thali".into()],
                total: 150.0,
                date: at,
                meal: None,
            })
            .await
            .unwrap();
        self.clock.set(now);
        order.id
    }
}

fn texts(out: &[Outbound]) -> Vec<String> {
    out.iter()
        .filter_map(|msg| match msg {
            Outbound::Text { text } | Outbound::Markdown { text } => Some(text.clone()),
            Outbound::Choice { prompt, .. } => Some(prompt.clone()),
            Outbound::Card { .. } => None,
        })
        .collect()
}

fn has_text(out: &[Outbound], needle: &str) -> bool {
    texts(out).iter().any(|t| t.contains(needle))
}

fn cards(out: &[Outbound]) -> Vec<&Card> {
    out.iter()
        .filter_map(|msg| match msg {
            Outbound::Card { card } => Some(card),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn first_contact_welcomes_and_asks_for_phone() {
    let h = Harness::new(ist(10, 0));
    let out = h.say("hello").await;
    assert_eq!(texts(&out), vec![WELCOME.to_string(), ASK_PHONE.to_string()]);
    assert_eq!(h.phase().await, Phase::AskPhone);

    // The welcome is sent once per conversation.
    let out = h.say("hello again").await;
    assert!(!has_text(&out, WELCOME));
}

#[tokio::test]
async fn invalid_phone_reprompts_without_transition() {
    let h = Harness::new(ist(10, 0));
    h.say("hi").await;
    for input in ["12345", "98765432100", "98765abcde", "+919876543210"] {
        let out = h.say(input).await;
        assert!(has_text(&out, INVALID_PHONE), "input {input}");
        assert_eq!(h.phase().await, Phase::AskPhone);
    }
    assert!(h.delivery.sent().is_empty());
}

#[tokio::test]
async fn new_phone_verifies_then_asks_name() {
    let h = Harness::new(ist(10, 0));
    h.say("hi").await;
    let out = h.say(PHONE).await;
    assert!(has_text(&out, OTP_SENT));
    assert_eq!(h.phase().await, Phase::VerifyOtp);

    let out = h.say("000000").await;
    assert!(has_text(&out, OTP_WRONG));
    assert_eq!(h.phase().await, Phase::VerifyOtp);

    let code = h.last_code();
    let out = h.say(&code).await;
    assert!(has_text(&out, ASK_NAME));
    assert_eq!(h.phase().await, Phase::AskName);
}

#[tokio::test]
async fn existing_profile_is_shown_after_verification() {
    let h = Harness::new(ist(10, 0));
    h.seed_profile().await;
    let out = h.verify_phone().await;

    assert_eq!(h.phase().await, Phase::AskUpdate);
    assert!(has_text(&out, WELCOME_BACK));
    assert!(cards(&out).iter().any(|card| matches!(
        card,
        Card::ProfileSummary { name, referral_code, .. } if name == "Asha" && referral_code == "HB10123"
    )));
    assert!(has_text(&out, ASK_UPDATE));
}

#[tokio::test]
async fn onboarding_chain_creates_profile() {
    let h = Harness::new(ist(10, 0));
    h.verify_phone().await;

    assert!(has_text(&h.say("Ravi Kumar").await, ASK_OFFICE));
    assert!(has_text(&h.say("Plot 4, Sector 18").await, ASK_HOME));
    assert!(has_text(&h.say("Flat 302, Palm Grove").await, ASK_HEARD));
    assert_eq!(h.phase().await, Phase::AskHeard);

    let out = h.say("Friend").await;
    assert!(has_text(&out, PROFILE_CREATED));
    assert!(has_text(&out, "Ordering is closed right now"));
    assert_eq!(h.phase().await, Phase::ShowMenu);

    let profile = h.store.get_profile(PHONE).await.unwrap().unwrap();
    assert_eq!(profile.name, "Ravi Kumar");
    assert_eq!(profile.office_address, "Plot 4, Sector 18");
    assert_eq!(profile.home_address, "Flat 302, Palm Grove");
    assert_eq!(profile.heard_from, "Friend");
    assert!(profile.referral_code.starts_with("HB10"));
    assert_eq!(profile.referral_code.len(), 7);
    assert_eq!(
        profile
            .conversation_address
            .as_ref()
            .map(|a| a.conversation_id.as_str()),
        Some(CONV)
    );

    let session = h.store.load_session(CONV).await.unwrap().unwrap();
    assert_eq!(session.draft, DraftProfile::default());
}

#[tokio::test]
async fn show_menu_outside_ordering_window_gives_notice() {
    let h = Harness::new(ist(10, 0));
    h.seed_idle_session().await;
    let out = h.say("what's for lunch?").await;
    assert_eq!(out, vec![ordering_closed()]);
    assert_eq!(h.phase().await, Phase::ShowMenu);
}

#[tokio::test]
async fn show_menu_inside_ordering_window_offers_order_entry() {
    let h = Harness::new(ist(14, 30));
    h.seed_idle_session().await;
    let out = h.say("menu").await;
    assert!(has_text(&out, "**Today's Menu**"));
    assert!(cards(&out).iter().any(|card| matches!(
        card,
        Card::OrderEntry { url } if url.ends_with("/order?phone=9876543210")
    )));
    assert_eq!(h.phase().await, Phase::ShowMenu);
}

#[tokio::test]
async fn resend_reuses_code_and_keeps_phase() {
    let h = Harness::new(ist(10, 0));
    h.say("hi").await;
    h.say(PHONE).await;
    let first = h.last_code();

    let out = h.say("Resend OTP").await;
    assert!(has_text(&out, OTP_RESENT));
    assert_eq!(h.last_code(), first);
    assert_eq!(h.phase().await, Phase::VerifyOtp);

    h.act(InboundAction::ResendOtp).await;
    assert_eq!(h.delivery.sent().len(), 3);
    assert_eq!(h.last_code(), first);
}

#[tokio::test]
async fn rate_limit_is_surfaced_verbatim() {
    let settings = OtpSettings {
        max_attempts: 2,
        ..OtpSettings::default()
    };
    let h = Harness::with_otp(ist(10, 0), settings);
    h.say("hi").await;
    h.say(PHONE).await;
    h.say("000000").await;

    let code = h.last_code();
    let out = h.say(&code).await;
    assert!(has_text(
        &out,
        "Too many OTP attempts. Please try again after 30 minutes."
    ));
    assert_eq!(h.phase().await, Phase::VerifyOtp);
}

#[tokio::test]
async fn declining_update_goes_to_menu() {
    let h = Harness::new(ist(10, 0));
    h.seed_profile().await;
    h.verify_phone().await;

    let out = h.say("maybe").await;
    assert!(has_text(&out, ASK_UPDATE));
    assert_eq!(h.phase().await, Phase::AskUpdate);

    let out = h.say("NO").await;
    assert!(has_text(&out, PROFILE_UNCHANGED));
    assert_eq!(h.phase().await, Phase::ShowMenu);
}

#[tokio::test]
async fn update_flow_requires_fresh_code_and_keeps_referral_code() {
    let h = Harness::new(ist(10, 0));
    h.seed_profile().await;
    h.verify_phone().await;

    let out = h.say("yes").await;
    assert!(has_text(&out, OTP_SENT_UPDATE));
    assert_eq!(h.phase().await, Phase::VerifyOtpUpdate);

    let code = h.last_code();
    assert!(has_text(&h.say(&code).await, ASK_NAME_UPDATE));
    assert_eq!(h.phase().await, Phase::UpdateName);

    h.say("Asha Rao").await;
    h.say("Tower C, Cyber City").await;
    h.say("14 MG Road").await;
    assert_eq!(h.phase().await, Phase::UpdateHeard);
    let out = h.say("Newspaper").await;
    assert!(has_text(&out, PROFILE_UPDATED));
    assert_eq!(h.phase().await, Phase::ShowMenu);

    let profile = h.store.get_profile(PHONE).await.unwrap().unwrap();
    assert_eq!(profile.name, "Asha Rao");
    assert_eq!(profile.office_address, "Tower C, Cyber City");
    assert_eq!(profile.heard_from, "Newspaper");
    assert_eq!(profile.referral_code, "HB10123");
}

#[tokio::test]
async fn update_action_from_idle_reloads_profile() {
    let h = Harness::new(ist(10, 0));
    h.seed_profile().await;
    h.seed_idle_session().await;

    let out = h.act(InboundAction::UpdateProfile).await;
    assert!(has_text(&out, OTP_SENT_UPDATE));
    let session = h.store.load_session(CONV).await.unwrap().unwrap();
    assert_eq!(session.phase, Phase::VerifyOtpUpdate);
    assert_eq!(session.draft.name.as_deref(), Some("Asha"));
}

#[tokio::test]
async fn cancel_outside_window_is_rejected_without_changes() {
    let h = Harness::new(ist(10, 0));
    h.seed_idle_session().await;
    let order_id = h.place_order_at(ist(7, 0)).await;

    let out = h.act(InboundAction::RequestCancel { order_id }).await;
    assert!(has_text(&out, "Orders can only be canceled between"));
    assert_eq!(h.phase().await, Phase::ShowMenu);

    let out = h.act(InboundAction::ConfirmCancel { order_id }).await;
    assert!(has_text(&out, "Orders can only be canceled between"));
    assert_eq!(h.phase().await, Phase::ShowMenu);
    assert!(h.delivery.sent().is_empty());

    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn cancel_inside_window_needs_otp() {
    let h = Harness::new(ist(8, 40));
    h.seed_idle_session().await;
    let order_id = h.place_order_at(ist(7, 0)).await;

    let out = h.act(InboundAction::RequestCancel { order_id }).await;
    assert!(cards(&out).iter().any(|card| matches!(
        card,
        Card::CancelConfirmation { order_id: id, .. } if *id == order_id
    )));
    assert_eq!(h.phase().await, Phase::ShowMenu);

    let out = h.act(InboundAction::ConfirmCancel { order_id }).await;
    assert!(has_text(&out, OTP_SENT_CANCEL));
    assert_eq!(h.phase().await, Phase::VerifyOtpCancel { order_id });

    let out = h.say("000000").await;
    assert!(has_text(&out, OTP_WRONG));
    assert_eq!(
        h.store.get_order(order_id).await.unwrap().unwrap().status,
        OrderStatus::Pending
    );

    let code = h.last_code();
    let out = h.say(&code).await;
    assert!(has_text(&out, ORDER_CANCELED));
    assert_eq!(h.phase().await, Phase::ShowMenu);
    assert_eq!(
        h.store.get_order(order_id).await.unwrap().unwrap().status,
        OrderStatus::Canceled
    );
}

#[tokio::test]
async fn keep_order_leaves_everything_alone() {
    let h = Harness::new(ist(8, 40));
    h.seed_idle_session().await;
    let order_id = h.place_order_at(ist(7, 0)).await;
    let out = h.act(InboundAction::KeepOrder).await;
    assert_eq!(texts(&out), vec![ORDER_KEPT.to_string()]);
    assert_eq!(
        h.store.get_order(order_id).await.unwrap().unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn text_in_feedback_window_is_captured_as_feedback() {
    let h = Harness::new(ist(13, 40));
    h.seed_idle_session().await;
    let order_id = h.place_order_at(ist(7, 0)).await;
    h.lifecycle.mark_delivered(order_id).await.unwrap();

    let out = h.say("Loved the paneer").await;
    assert_eq!(texts(&out), vec![FEEDBACK_THANKS.to_string()]);
    assert_eq!(h.phase().await, Phase::ShowMenu);
    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.feedback.as_deref(), Some("Loved the paneer"));

    // Nothing left to attach to: the idle reply comes back.
    let out = h.say("thanks").await;
    assert_eq!(out, vec![ordering_closed()]);
}

#[tokio::test]
async fn otp_code_is_not_taken_as_feedback() {
    let h = Harness::new(ist(13, 40));
    let order_id = h.place_order_at(ist(7, 0)).await;
    h.lifecycle.mark_delivered(order_id).await.unwrap();

    h.verify_phone().await;
    assert_eq!(h.phase().await, Phase::AskName);
    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.feedback, None);
}

#[tokio::test]
async fn order_notice_is_delivered_once() {
    let h = Harness::new(ist(10, 0));
    h.seed_idle_session().await;
    let order_id = h.place_order_at(ist(7, 0)).await;
    h.kv.set(&order_notice_key(PHONE), &order_id.to_string(), None)
        .await
        .unwrap();

    let out = h.say("hi").await;
    assert!(has_text(&out, ORDER_RECEIVED));
    assert_eq!(
        cards(&out),
        vec![&Card::OrderConfirmation {
            order_id,
            items: vec!["Dal Tadka Thali".into()],
            total: 150.0,
        }]
    );
    let received_at = out
        .iter()
        .position(|msg| *msg == Outbound::text(ORDER_RECEIVED))
        .unwrap();
    assert!(matches!(
        out[received_at + 1],
        Outbound::Card {
            card: Card::OrderConfirmation { .. }
        }
    ));

    let out = h.say("hi").await;
    assert!(!has_text(&out, ORDER_RECEIVED));
    assert!(cards(&out).is_empty());
}

#[tokio::test]
async fn order_notice_without_a_known_order_has_no_card() {
    let h = Harness::new(ist(10, 0));
    h.seed_idle_session().await;
    h.kv.set(&order_notice_key(PHONE), "not-an-order", None)
        .await
        .unwrap();

    let out = h.say("hi").await;
    assert!(has_text(&out, ORDER_RECEIVED));
    assert!(cards(&out).is_empty());
}

#[tokio::test]
async fn address_is_recorded_on_known_profile() {
    let h = Harness::new(ist(10, 0));
    h.seed_profile().await;
    h.seed_idle_session().await;
    h.say("hi").await;
    let profile = h.store.get_profile(PHONE).await.unwrap().unwrap();
    let address = profile.conversation_address.unwrap();
    assert_eq!(address.conversation_id, CONV);
    assert_eq!(address.service_url.as_deref(), Some("http://transport/push"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_messages_of_one_conversation_do_not_interleave() {
    // Each save sleeps, so an unserialized second turn would load the
    // session before the first one has written it back.
    let h = Harness::with_slow_saves(ist(10, 0), StdDuration::from_millis(50));
    h.verify_phone().await;
    assert_eq!(h.phase().await, Phase::AskName);

    let (_, _) = tokio::join!(h.say("Ravi"), h.say("Plot 4, Sector 18"));
    let session = h.store.load_session(CONV).await.unwrap().unwrap();
    assert_eq!(session.phase, Phase::AskHome);
    assert_eq!(session.draft.name.as_deref(), Some("Ravi"));
    assert_eq!(
        session.draft.office_address.as_deref(),
        Some("Plot 4, Sector 18")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_waits_for_the_turn_holding_the_phone() {
    let h = Harness::with_slow_saves(ist(13, 30), StdDuration::from_millis(100));
    h.seed_idle_session().await;
    let order_id = h.place_order_at(ist(7, 0)).await;
    let scheduler = h.scheduler();

    let status_mid_turn = async {
        h.faulty.save_started.notified().await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        h.store.get_order(order_id).await.unwrap().unwrap().status
    };
    let (_, report, mid_turn) = tokio::join!(
        h.say("hi"),
        scheduler.run_job(Job::FeedbackClose(MealType::Lunch)),
        status_mid_turn,
    );

    assert_eq!(mid_turn, OrderStatus::Pending);
    assert_eq!(report.processed, 1);
    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn otp_send_failure_keeps_asking_for_the_phone() {
    let h = Harness::with_failing_delivery(ist(10, 0));
    h.say("hi").await;

    let out = h.say(PHONE).await;
    assert_eq!(texts(&out), vec![OTP_SEND_FAILED.to_string()]);
    let session = h.store.load_session(CONV).await.unwrap().unwrap();
    assert_eq!(session.phase, Phase::AskPhone);
    assert_eq!(session.phone, None);
}

#[tokio::test]
async fn store_failure_mid_turn_apologizes_once_and_keeps_progress() {
    let h = Harness::new(ist(10, 0));
    h.verify_phone().await;
    h.say("Asha").await;
    h.say("Tower B, Cyber City").await;
    h.say("12 MG Road").await;
    assert_eq!(h.phase().await, Phase::AskHeard);

    h.faulty.fail_profile_inserts.store(true, Ordering::SeqCst);
    let out = h.say("Friend").await;
    assert_eq!(texts(&out), vec![SOMETHING_WENT_WRONG.to_string()]);

    let session = h.store.load_session(CONV).await.unwrap().unwrap();
    assert_eq!(session.phase, Phase::AskHeard);
    assert_eq!(session.draft.heard_from.as_deref(), Some("Friend"));
    assert_eq!(session.draft.name.as_deref(), Some("Asha"));
    assert!(h.store.get_profile(PHONE).await.unwrap().is_none());

    h.faulty.fail_profile_inserts.store(false, Ordering::SeqCst);
    let out = h.say("Friend").await;
    assert!(has_text(&out, PROFILE_CREATED));
    assert_eq!(h.phase().await, Phase::ShowMenu);
}

#[tokio::test]
async fn referral_codes_stay_unique_under_collisions() {
    let h = Harness::new(ist(10, 0));
    let draft = DraftProfile::default();
    let address = healthybites_core::profile::ConversationAddress {
        conversation_id: CONV.into(),
        service_url: None,
    };
    // Every phone ends in "10", so candidates share a 1000-code space.
    let mut codes = HashSet::new();
    for n in 0..300 {
        let phone = format!("9{n:07}10");
        let profile = h
            .engine
            .create_profile(&phone, &draft, address.clone())
            .await
            .unwrap();
        assert!(codes.insert(profile.referral_code));
    }
}
