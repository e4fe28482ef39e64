//! Persistence seams. The conversation engine, order lifecycle and
//! scheduler only see these traits; Postgres and in-memory backends
//! implement all of them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use healthybites_core::conversation::ConversationSession;
use healthybites_core::orders::{Order, OrderStatus};
use healthybites_core::profile::UserProfile;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryKeyValueStore, MemoryStore};
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated on {field}")]
    Conflict { field: String },
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, phone: &str) -> Result<Option<UserProfile>, StoreError>;
    /// Fails with `StoreError::Conflict` when the phone or referral code is taken.
    async fn insert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
    /// Overwrites every mutable field; the referral code is left untouched.
    async fn update_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
    async fn referral_code_exists(&self, code: &str) -> Result<bool, StoreError>;
    async fn list_profiles(&self) -> Result<Vec<UserProfile>, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;
    /// Moves an order from `from` to `to`. Returns `false` when the order was
    /// not in `from`, so a transition applies at most once.
    async fn transition_order(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;
    /// Sets feedback on a delivered order that has none yet.
    async fn set_feedback(&self, id: Uuid, feedback: &str) -> Result<bool, StoreError>;
    async fn has_pending_order(&self, phone: &str) -> Result<bool, StoreError>;
    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError>;
    /// Pending orders with `from <= placed_at < until`.
    async fn pending_orders_placed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError>;
    async fn latest_delivered_without_feedback(
        &self,
        phone: &str,
    ) -> Result<Option<Order>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSession>, StoreError>;
    async fn save_session(&self, session: &ConversationSession) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Store: ProfileStore + OrderStore + SessionStore {
    async fn ping(&self) -> Result<(), StoreError>;
}

/// String key-value store with optional per-entry expiry. Holds OTP
/// challenges, attempt ledgers and one-shot notices.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Reads and removes an entry.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}
