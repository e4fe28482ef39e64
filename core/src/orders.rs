use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::profile::MealType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum OrderStatus {
    Pending,
    Delivered,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "delivered" => Some(OrderStatus::Delivered),
            "canceled" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }

    /// Pending is the only status that can move; Delivered and Canceled are
    /// terminal for status purposes.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Delivered)
                | (OrderStatus::Pending, OrderStatus::Canceled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub phone: String,
    pub items: Vec<String>,
    pub total: f64,
    /// Date the customer asked the order for.
    pub date: DateTime<Utc>,
    /// When the order reached the system. Drives the cancel window.
    pub placed_at: DateTime<Utc>,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal: Option<MealType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Order {
    pub fn accepts_feedback(&self) -> bool {
        self.status == OrderStatus::Delivered && self.feedback.is_none()
    }
}

/// Order intake payload. Every field is optional at the wire level so a
/// missing one is reported as a validation error naming the field.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<String>>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// A validated order intake, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub phone: String,
    pub items: Vec<String>,
    pub total: f64,
    pub date: DateTime<Utc>,
    pub meal: Option<MealType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField(pub &'static str);

impl CreateOrderRequest {
    pub fn validate(self) -> Result<NewOrder, MissingField> {
        let phone = self
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or(MissingField("phone"))?;
        let items = self
            .items
            .filter(|items| !items.is_empty())
            .ok_or(MissingField("items"))?;
        let total = self
            .total
            .filter(|total| total.is_finite())
            .ok_or(MissingField("total"))?;
        let date = self.date.ok_or(MissingField("date"))?;
        Ok(NewOrder {
            phone,
            items,
            total,
            date,
            meal: None,
        })
    }
}
