//! Time-triggered jobs. Each job fires once a day at a minute taken from the
//! window table, runs in its own task, and works through its collection item
//! by item: one failing profile or order is logged and skipped.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use url::Url;

use healthybites_core::conversation::{Card, Outbound};
use healthybites_core::menu::Menu;
use healthybites_core::orders::{NewOrder, Order};
use healthybites_core::profile::{ConversationAddress, MealType};
use healthybites_core::windows::{TimeWindowPolicy, WindowKind};

use crate::clock::Clock;
use crate::conversation::replies::menu_with_order_entry;
use crate::delivery::{DeliveryError, Messenger};
use crate::lifecycle::OrderLifecycle;
use crate::locks::{KeyedLocks, phone_key};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Menu and order link to every reachable profile, when ordering opens.
    MenuPush(MealType),
    /// Auto-orders for subscribers, when ordering closes.
    SubscriptionOrders(MealType),
    /// "You can still cancel" card for today's pending orders.
    CancelOffer(MealType),
    /// Feedback request, then every pending order becomes Delivered.
    FeedbackClose(MealType),
}

impl Job {
    pub const ALL: [Job; 8] = [
        Job::MenuPush(MealType::Lunch),
        Job::MenuPush(MealType::Dinner),
        Job::SubscriptionOrders(MealType::Lunch),
        Job::SubscriptionOrders(MealType::Dinner),
        Job::CancelOffer(MealType::Lunch),
        Job::CancelOffer(MealType::Dinner),
        Job::FeedbackClose(MealType::Lunch),
        Job::FeedbackClose(MealType::Dinner),
    ];

    /// Local minute of day the job fires at.
    pub fn trigger_minute(self) -> u32 {
        match self {
            Job::MenuPush(meal) => WindowKind::ordering(meal).window().start,
            Job::SubscriptionOrders(meal) => WindowKind::ordering(meal).window().end,
            Job::CancelOffer(meal) => WindowKind::cancel(meal).window().start,
            Job::FeedbackClose(meal) => WindowKind::feedback(meal).window().start,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Job::MenuPush(MealType::Lunch) => "menu_push_lunch",
            Job::MenuPush(MealType::Dinner) => "menu_push_dinner",
            Job::SubscriptionOrders(MealType::Lunch) => "subscription_orders_lunch",
            Job::SubscriptionOrders(MealType::Dinner) => "subscription_orders_dinner",
            Job::CancelOffer(MealType::Lunch) => "cancel_offer_lunch",
            Job::CancelOffer(MealType::Dinner) => "cancel_offer_dinner",
            Job::FeedbackClose(MealType::Lunch) => "feedback_close_lunch",
            Job::FeedbackClose(MealType::Dinner) => "feedback_close_dinner",
        }
    }
}

/// First instant strictly after `after` at which `job` fires. Days where the
/// trigger minute does not exist locally are skipped.
pub fn next_fire(
    policy: &TimeWindowPolicy,
    job: Job,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let today = policy.local(after).date_naive();
    (0..=2)
        .filter_map(|offset| policy.instant_at(today + Duration::days(offset), job.trigger_minute()))
        .find(|at| *at > after)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
enum PushError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("push timed out after {0:?}")]
    TimedOut(StdDuration),
}

pub struct SchedulerSettings {
    pub policy: TimeWindowPolicy,
    pub menu: Arc<Menu>,
    pub public_base_url: Url,
    pub proactive_timeout: StdDuration,
}

pub struct NotificationScheduler {
    store: Arc<dyn Store>,
    lifecycle: Arc<OrderLifecycle>,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    settings: SchedulerSettings,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: Arc<OrderLifecycle>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyedLocks>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            lifecycle,
            messenger,
            clock,
            locks,
            settings,
        }
    }

    /// Starts one background task per job.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        Job::ALL
            .into_iter()
            .map(|job| {
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move { scheduler.run_schedule(job).await })
            })
            .collect()
    }

    async fn run_schedule(&self, job: Job) {
        let mut cursor = self.clock.now();
        loop {
            let now = self.clock.now().max(cursor);
            let Some(next) = next_fire(&self.settings.policy, job, now) else {
                tracing::error!(job = job.name(), "no upcoming trigger time, stopping job");
                return;
            };
            tracing::debug!(job = job.name(), next = %next, "job scheduled");
            let wait = (next - self.clock.now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            cursor = next;
            self.run_job(job).await;
        }
    }

    pub async fn run_job(&self, job: Job) -> JobReport {
        let result = match job {
            Job::MenuPush(meal) => self.menu_push(meal).await,
            Job::SubscriptionOrders(meal) => self.subscription_orders(meal).await,
            Job::CancelOffer(meal) => self.cancel_offer(meal).await,
            Job::FeedbackClose(meal) => self.feedback_close(meal).await,
        };
        match result {
            Ok(report) => {
                tracing::info!(
                    job = job.name(),
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failed,
                    "scheduled job finished"
                );
                report
            }
            Err(err) => {
                tracing::error!(job = job.name(), error = %err, "scheduled job aborted");
                JobReport::default()
            }
        }
    }

    async fn menu_push(&self, meal: MealType) -> Result<JobReport, StoreError> {
        let job = Job::MenuPush(meal).name();
        let mut report = JobReport::default();
        for profile in self.store.list_profiles().await? {
            let Some(address) = &profile.conversation_address else {
                report.skipped += 1;
                continue;
            };
            let messages = menu_with_order_entry(
                &self.settings.menu,
                &self.settings.public_base_url,
                &profile.phone,
            );
            match self.push(address, &messages).await {
                Ok(()) => report.processed += 1,
                Err(err) => {
                    tracing::warn!(job, phone = %profile.phone, error = %err, "menu push failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn subscription_orders(&self, meal: MealType) -> Result<JobReport, StoreError> {
        let job = Job::SubscriptionOrders(meal).name();
        let now = self.clock.now();
        let mut report = JobReport::default();
        for profile in self.store.list_profiles().await? {
            let items = profile.default_items(meal);
            if !profile.subscription_active(now)
                || !profile.subscription_status.covers(meal)
                || items.is_empty()
            {
                continue;
            }

            let _guard = self.locks.acquire(&phone_key(&profile.phone)).await;
            let new = NewOrder {
                phone: profile.phone.clone(),
                items: items.to_vec(),
                total: 0.0,
                date: now,
                meal: Some(meal),
            };
            match self.lifecycle.create_if_none_pending(new).await {
                Ok(Some(order)) => {
                    tracing::info!(job, phone = %profile.phone, order_id = %order.id, "subscription order created");
                    report.processed += 1;
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(job, phone = %profile.phone, error = %err, "subscription order failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn cancel_offer(&self, meal: MealType) -> Result<JobReport, StoreError> {
        let job = Job::CancelOffer(meal).name();
        let policy = &self.settings.policy;
        let now = self.clock.now();
        let today = policy.local(now).date_naive();
        let (Some(from), Some(until)) = (
            policy.start_of_day(now),
            policy.instant_at(today, WindowKind::cancel(meal).window().start),
        ) else {
            return Ok(JobReport::default());
        };

        let mut report = JobReport::default();
        for order in self.store.pending_orders_placed_between(from, until).await? {
            if policy.cancel_window_for(order.placed_at) != (today, meal) {
                report.skipped += 1;
                continue;
            }
            let card = Card::CancelOffer {
                order_id: order.id,
                items: order.items.clone(),
            };
            match self.push_to_phone(&order, card).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(job, order_id = %order.id, error = %err, "cancel offer failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Asks for feedback on every pending order, then marks it Delivered.
    /// The status change never depends on the push outcome.
    async fn feedback_close(&self, meal: MealType) -> Result<JobReport, StoreError> {
        let job = Job::FeedbackClose(meal).name();
        let mut report = JobReport::default();
        for order in self.store.pending_orders().await? {
            let card = Card::FeedbackRequest {
                order_id: order.id,
                items: order.items.clone(),
            };
            if let Err(err) = self.push_to_phone(&order, card).await {
                tracing::warn!(job, order_id = %order.id, error = %err, "feedback request not delivered");
            }

            let _guard = self.locks.acquire(&phone_key(&order.phone)).await;
            match self.lifecycle.mark_delivered(order.id).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(job, order_id = %order.id, error = %err, "failed to mark order delivered");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Pushes a card to the order owner's last known conversation. Returns
    /// `false` when there is no address to push to.
    async fn push_to_phone(&self, order: &Order, card: Card) -> Result<bool, SchedulerItemError> {
        let profile = self.store.get_profile(&order.phone).await?;
        let Some(address) = profile.and_then(|p| p.conversation_address) else {
            return Ok(false);
        };
        self.push(&address, &[Outbound::card(card)]).await?;
        Ok(true)
    }

    async fn push(
        &self,
        address: &ConversationAddress,
        messages: &[Outbound],
    ) -> Result<(), PushError> {
        let timeout = self.settings.proactive_timeout;
        match tokio::time::timeout(timeout, self.messenger.push(address, messages)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PushError::TimedOut(timeout)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SchedulerItemError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Push(#[from] PushError),
}
