//! Order status transitions. Callers that act on behalf of a phone hold that
//! phone's lock; the store's conditional transitions make every status
//! change apply at most once regardless.

use std::sync::Arc;

use uuid::Uuid;

use healthybites_core::orders::{CreateOrderRequest, NewOrder, Order, OrderStatus};
use healthybites_core::windows::{TimeWindowPolicy, cancel_windows_label};

use crate::clock::Clock;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("order {0} not found")]
    NotFound(Uuid),
    #[error("order cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Orders can only be canceled between {windows}.")]
    WindowClosed { windows: String },
    #[error("missing or empty field '{0}'")]
    Validation(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    policy: TimeWindowPolicy,
    clock: Arc<dyn Clock>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>, policy: TimeWindowPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    /// Validates an intake payload and persists it as a Pending order.
    pub async fn create_from_request(
        &self,
        request: CreateOrderRequest,
    ) -> Result<Order, LifecycleError> {
        let new = request
            .validate()
            .map_err(|missing| LifecycleError::Validation(missing.0))?;
        self.create(new).await
    }

    pub async fn create(&self, new: NewOrder) -> Result<Order, LifecycleError> {
        if new.items.is_empty() {
            return Err(LifecycleError::Validation("items"));
        }
        if !new.total.is_finite() {
            return Err(LifecycleError::Validation("total"));
        }
        let now = self.clock.now();
        let order = Order {
            id: Uuid::now_v7(),
            meal: new.meal.or_else(|| self.policy.ordering_open(now)),
            phone: new.phone,
            items: new.items,
            total: new.total,
            date: new.date,
            placed_at: now,
            status: OrderStatus::Pending,
            feedback: None,
        };
        self.store.insert_order(&order).await?;
        tracing::info!(order_id = %order.id, phone = %order.phone, "order created");
        Ok(order)
    }

    /// Creates the order unless the phone already has a Pending one.
    pub async fn create_if_none_pending(
        &self,
        new: NewOrder,
    ) -> Result<Option<Order>, LifecycleError> {
        if self.store.has_pending_order(&new.phone).await? {
            return Ok(None);
        }
        self.create(new).await.map(Some)
    }

    /// Loads an order and checks it can be canceled right now.
    pub async fn check_cancelable(&self, order_id: Uuid) -> Result<Order, LifecycleError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(LifecycleError::NotFound(order_id))?;
        if !order.status.can_transition_to(OrderStatus::Canceled) {
            return Err(LifecycleError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Canceled,
            });
        }
        if !self.policy.can_cancel(order.placed_at, self.clock.now()) {
            return Err(LifecycleError::WindowClosed {
                windows: cancel_windows_label(),
            });
        }
        Ok(order)
    }

    /// Cancels an order owned by `phone`. The caller has already verified
    /// phone ownership through an OTP.
    pub async fn cancel(&self, order_id: Uuid, phone: &str) -> Result<Order, LifecycleError> {
        let mut order = self.check_cancelable(order_id).await?;
        if order.phone != phone {
            return Err(LifecycleError::NotFound(order_id));
        }
        if !self
            .store
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Canceled)
            .await?
        {
            return Err(LifecycleError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Canceled,
            });
        }
        order.status = OrderStatus::Canceled;
        tracing::info!(order_id = %order_id, phone = %phone, "order canceled");
        Ok(order)
    }

    /// Returns whether this call moved the order to Delivered.
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<bool, LifecycleError> {
        let moved = self
            .store
            .transition_order(order_id, OrderStatus::Pending, OrderStatus::Delivered)
            .await?;
        if moved {
            tracing::debug!(order_id = %order_id, "order delivered");
        }
        Ok(moved)
    }

    /// Attaches feedback to the phone's latest delivered order that has none.
    pub async fn attach_feedback(
        &self,
        phone: &str,
        text: &str,
    ) -> Result<Option<Order>, LifecycleError> {
        let Some(mut order) = self.store.latest_delivered_without_feedback(phone).await? else {
            return Ok(None);
        };
        if !self.store.set_feedback(order.id, text).await? {
            return Ok(None);
        }
        order.feedback = Some(text.to_string());
        tracing::info!(order_id = %order.id, phone = %phone, "feedback recorded");
        Ok(Some(order))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use chrono_tz::Asia::Kolkata;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, OrderStore};

    const PHONE: &str = "9876543210";

    // 07:00 IST on 2026-03-02.
    fn morning() -> DateTime<Utc> {
        "2026-03-02T01:30:00Z".parse().unwrap()
    }

    fn setup() -> (OrderLifecycle, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(morning()));
        let lifecycle = OrderLifecycle::new(
            store.clone(),
            TimeWindowPolicy::new(Kolkata),
            clock.clone(),
        );
        (lifecycle, store, clock)
    }

    fn new_order(phone: &str) -> NewOrder {
        NewOrder {
            phone: phone.to_string(),
            items: vec!["Paneer Power Bowl".into()],
            total: 180.0,
            date: morning(),
            meal: None,
        }
    }

    #[tokio::test]
    async fn intake_rejects_missing_fields() {
        let (lifecycle, _, _) = setup();
        let err = lifecycle
            .create_from_request(CreateOrderRequest {
                phone: Some(PHONE.into()),
                items: Some(vec!["Dal".into()]),
                total: None,
                date: Some(morning()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation("total")));
    }

    #[tokio::test]
    async fn order_placed_in_lunch_ordering_is_tagged_lunch() {
        let (lifecycle, _, _) = setup();
        let order = lifecycle.create(new_order(PHONE)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(
            order.meal,
            Some(healthybites_core::profile::MealType::Lunch)
        );
    }

    #[tokio::test]
    async fn second_pending_order_is_not_created() {
        let (lifecycle, _, _) = setup();
        assert!(
            lifecycle
                .create_if_none_pending(new_order(PHONE))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            lifecycle
                .create_if_none_pending(new_order(PHONE))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancel_only_inside_the_order_cancel_window() {
        let (lifecycle, store, clock) = setup();
        let order = lifecycle.create(new_order(PHONE)).await.unwrap();

        // 08:00 IST: window not open yet.
        clock.set(morning() + Duration::hours(1));
        let err = lifecycle.cancel(order.id, PHONE).await.unwrap_err();
        assert!(matches!(err, LifecycleError::WindowClosed { .. }));
        assert_eq!(
            store.get_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Pending
        );

        // 08:40 IST: open.
        clock.set(morning() + Duration::minutes(100));
        let canceled = lifecycle.cancel(order.id, PHONE).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);

        let err = lifecycle.cancel(order.id, PHONE).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn cancel_after_window_closes_is_rejected() {
        let (lifecycle, store, clock) = setup();
        let order = lifecycle.create(new_order(PHONE)).await.unwrap();
        // 09:01 IST.
        clock.set(morning() + Duration::minutes(121));
        assert!(matches!(
            lifecycle.cancel(order.id, PHONE).await,
            Err(LifecycleError::WindowClosed { .. })
        ));
        assert_eq!(
            store.get_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn cancel_requires_owning_phone() {
        let (lifecycle, _, clock) = setup();
        let order = lifecycle.create(new_order(PHONE)).await.unwrap();
        clock.set(morning() + Duration::minutes(100));
        assert!(matches!(
            lifecycle.cancel(order.id, "1111111111").await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delivered_once_then_feedback_once() {
        let (lifecycle, _, _) = setup();
        let order = lifecycle.create(new_order(PHONE)).await.unwrap();
        assert!(lifecycle.attach_feedback(PHONE, "early").await.unwrap().is_none());

        assert!(lifecycle.mark_delivered(order.id).await.unwrap());
        assert!(!lifecycle.mark_delivered(order.id).await.unwrap());

        let with_feedback = lifecycle.attach_feedback(PHONE, "Loved it").await.unwrap();
        assert_eq!(with_feedback.unwrap().feedback.as_deref(), Some("Loved it"));
        assert!(lifecycle.attach_feedback(PHONE, "again").await.unwrap().is_none());
    }
}
