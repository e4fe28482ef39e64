use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use healthybites_core::conversation::ConversationSession;
use healthybites_core::orders::{Order, OrderStatus};
use healthybites_core::profile::{ConversationAddress, MealType, SubscriptionTier, UserProfile};

use super::{KeyValueStore, OrderStore, ProfileStore, SessionStore, Store, StoreError};
use crate::clock::Clock;

const PROFILE_COLUMNS: &str = "phone, name, office_address, home_address, heard_from, \
     referral_code, successful_referrals_given, referrals_used, all_referrals_used, \
     subscription_status, subscription_end_date, order_lunch, order_dinner, conversation_address";

const ORDER_COLUMNS: &str = "id, phone, items, total, date, placed_at, status, meal, feedback";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    phone: String,
    name: String,
    office_address: String,
    home_address: String,
    heard_from: String,
    referral_code: String,
    successful_referrals_given: i32,
    referrals_used: i32,
    all_referrals_used: Vec<String>,
    subscription_status: String,
    subscription_end_date: Option<DateTime<Utc>>,
    order_lunch: Vec<String>,
    order_dinner: Vec<String>,
    conversation_address: Option<Json<ConversationAddress>>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let subscription_status =
            SubscriptionTier::parse(&row.subscription_status).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "profile {} has unknown subscription status '{}'",
                    row.phone, row.subscription_status
                ))
            })?;
        Ok(UserProfile {
            phone: row.phone,
            name: row.name,
            office_address: row.office_address,
            home_address: row.home_address,
            heard_from: row.heard_from,
            referral_code: row.referral_code,
            successful_referrals_given: row.successful_referrals_given,
            referrals_used: row.referrals_used,
            all_referrals_used: row.all_referrals_used,
            subscription_status,
            subscription_end_date: row.subscription_end_date,
            order_lunch: row.order_lunch,
            order_dinner: row.order_dinner,
            conversation_address: row.conversation_address.map(|Json(address)| address),
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    phone: String,
    items: Vec<String>,
    total: f64,
    date: DateTime<Utc>,
    placed_at: DateTime<Utc>,
    status: String,
    meal: Option<String>,
    feedback: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("order {} has unknown status '{}'", row.id, row.status))
        })?;
        Ok(Order {
            id: row.id,
            phone: row.phone,
            items: row.items,
            total: row.total,
            date: row.date,
            placed_at: row.placed_at,
            status,
            meal: row.meal.as_deref().and_then(MealType::parse),
            feedback: row.feedback,
        })
    }
}

fn collect_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>, StoreError> {
    rows.into_iter().map(Order::try_from).collect()
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some("profiles_referral_code_key") => "referral_code",
                _ => "phone",
            };
            return StoreError::Conflict {
                field: field.to_string(),
            };
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get_profile(&self, phone: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE phone = $1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserProfile::try_from).transpose()
    }

    async fn insert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO profiles (phone, name, office_address, home_address, heard_from, \
             referral_code, successful_referrals_given, referrals_used, all_referrals_used, \
             subscription_status, subscription_end_date, order_lunch, order_dinner, conversation_address) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&profile.phone)
        .bind(&profile.name)
        .bind(&profile.office_address)
        .bind(&profile.home_address)
        .bind(&profile.heard_from)
        .bind(&profile.referral_code)
        .bind(profile.successful_referrals_given)
        .bind(profile.referrals_used)
        .bind(&profile.all_referrals_used)
        .bind(profile.subscription_status.as_str())
        .bind(profile.subscription_end_date)
        .bind(&profile.order_lunch)
        .bind(&profile.order_dinner)
        .bind(profile.conversation_address.clone().map(Json))
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;
        Ok(())
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE profiles SET name = $2, office_address = $3, home_address = $4, \
             heard_from = $5, successful_referrals_given = $6, referrals_used = $7, \
             all_referrals_used = $8, subscription_status = $9, subscription_end_date = $10, \
             order_lunch = $11, order_dinner = $12, conversation_address = $13, updated_at = now() \
             WHERE phone = $1",
        )
        .bind(&profile.phone)
        .bind(&profile.name)
        .bind(&profile.office_address)
        .bind(&profile.home_address)
        .bind(&profile.heard_from)
        .bind(profile.successful_referrals_given)
        .bind(profile.referrals_used)
        .bind(&profile.all_referrals_used)
        .bind(profile.subscription_status.as_str())
        .bind(profile.subscription_end_date)
        .bind(&profile.order_lunch)
        .bind(&profile.order_dinner)
        .bind(profile.conversation_address.clone().map(Json))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!(
                "profile {} vanished during update",
                profile.phone
            )));
        }
        Ok(())
    }

    async fn referral_code_exists(&self, code: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE referral_code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY phone"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserProfile::try_from).collect()
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, phone, items, total, date, placed_at, status, meal, feedback) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order.id)
        .bind(&order.phone)
        .bind(&order.items)
        .bind(order.total)
        .bind(order.date)
        .bind(order.placed_at)
        .bind(order.status.as_str())
        .bind(order.meal.map(MealType::as_str))
        .bind(&order.feedback)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn transition_order(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_feedback(&self, id: Uuid, feedback: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET feedback = $2 \
             WHERE id = $1 AND status = 'delivered' AND feedback IS NULL",
        )
        .bind(id)
        .bind(feedback)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn has_pending_order(&self, phone: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM orders WHERE phone = $1 AND status = 'pending')",
        )
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'pending' ORDER BY placed_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        collect_orders(rows)
    }

    async fn pending_orders_placed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'pending' AND placed_at >= $1 AND placed_at < $2 \
             ORDER BY placed_at"
        ))
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;
        collect_orders(rows)
    }

    async fn latest_delivered_without_feedback(
        &self,
        phone: &str,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE phone = $1 AND status = 'delivered' AND feedback IS NULL \
             ORDER BY placed_at DESC LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn load_session(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSession>, StoreError> {
        let state: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT state FROM conversation_sessions WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        state
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    StoreError::Corrupt(format!("session {conversation_id}: {e}"))
                })
            })
            .transpose()
    }

    async fn save_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation_sessions (conversation_id, state, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (conversation_id) DO UPDATE SET state = EXCLUDED.state, updated_at = now()",
        )
        .bind(&session.conversation_id)
        .bind(Json(session))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM kv_entries \
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(key)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
