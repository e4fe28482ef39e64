use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use healthybites_core::conversation::ConversationSession;
use healthybites_core::orders::{Order, OrderStatus};
use healthybites_core::profile::UserProfile;

use super::{KeyValueStore, OrderStore, ProfileStore, SessionStore, Store, StoreError};
use crate::clock::Clock;

/// Process-local store used by tests and by runs without `DATABASE_URL`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
    orders: RwLock<HashMap<Uuid, Order>>,
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, phone: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.read().await.get(phone).cloned())
    }

    async fn insert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.phone) {
            return Err(StoreError::Conflict {
                field: "phone".to_string(),
            });
        }
        if profiles
            .values()
            .any(|existing| existing.referral_code == profile.referral_code)
        {
            return Err(StoreError::Conflict {
                field: "referral_code".to_string(),
            });
        }
        profiles.insert(profile.phone.clone(), profile.clone());
        Ok(())
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        match profiles.get_mut(&profile.phone) {
            Some(existing) => {
                let referral_code = existing.referral_code.clone();
                *existing = profile.clone();
                existing.referral_code = referral_code;
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!(
                "profile {} vanished during update",
                profile.phone
            ))),
        }
    }

    async fn referral_code_exists(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .any(|profile| profile.referral_code == code))
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let mut profiles: Vec<_> = self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| a.phone.cmp(&b.phone));
        Ok(profiles)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn transition_order(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_feedback(&self, id: Uuid, feedback: &str) -> Result<bool, StoreError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(order) if order.accepts_feedback() => {
                order.feedback = Some(feedback.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn has_pending_order(&self, phone: &str) -> Result<bool, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .any(|order| order.phone == phone && order.status == OrderStatus::Pending))
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        Ok(sorted_by_placement(
            self.orders
                .read()
                .await
                .values()
                .filter(|order| order.status == OrderStatus::Pending)
                .cloned()
                .collect(),
        ))
    }

    async fn pending_orders_placed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        Ok(sorted_by_placement(
            self.orders
                .read()
                .await
                .values()
                .filter(|order| {
                    order.status == OrderStatus::Pending
                        && order.placed_at >= from
                        && order.placed_at < until
                })
                .cloned()
                .collect(),
        ))
    }

    async fn latest_delivered_without_feedback(
        &self,
        phone: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|order| order.phone == phone && order.accepts_feedback())
            .max_by_key(|order| order.placed_at)
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSession>, StoreError> {
        Ok(self.sessions.read().await.get(conversation_id).cloned())
    }

    async fn save_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.conversation_id.clone(), session.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn sorted_by_placement(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by_key(|order| order.placed_at);
    orders
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory expiring key-value store. Expiry is judged against the
/// injected clock, never the wall clock.
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKeyValueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at.is_none_or(|at| at > now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
