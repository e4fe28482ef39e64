use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Exactly ten ASCII digits. `\d` would also accept non-ASCII digits.
static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("phone pattern must compile"));

pub fn is_valid_phone(input: &str) -> bool {
    PHONE_PATTERN.is_match(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Lunch,
    Dinner,
}

impl MealType {
    pub const ALL: [MealType; 2] = [MealType::Lunch, MealType::Dinner];

    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "lunch" => Some(MealType::Lunch),
            "dinner" => Some(MealType::Dinner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SubscriptionTier {
    #[default]
    None,
    Monthly,
    #[serde(rename = "Monthly_Lunch")]
    MonthlyLunch,
    #[serde(rename = "Monthly_Dinner")]
    MonthlyDinner,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::None => "None",
            SubscriptionTier::Monthly => "Monthly",
            SubscriptionTier::MonthlyLunch => "Monthly_Lunch",
            SubscriptionTier::MonthlyDinner => "Monthly_Dinner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "None" => Some(SubscriptionTier::None),
            "Monthly" => Some(SubscriptionTier::Monthly),
            "Monthly_Lunch" => Some(SubscriptionTier::MonthlyLunch),
            "Monthly_Dinner" => Some(SubscriptionTier::MonthlyDinner),
            _ => None,
        }
    }

    pub fn covers(self, meal: MealType) -> bool {
        matches!(
            (self, meal),
            (SubscriptionTier::Monthly, _)
                | (SubscriptionTier::MonthlyLunch, MealType::Lunch)
                | (SubscriptionTier::MonthlyDinner, MealType::Dinner)
        )
    }
}

/// Opaque handle the chat transport needs to push a message outside of a
/// direct reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConversationAddress {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub phone: String,
    pub name: String,
    pub office_address: String,
    pub home_address: String,
    pub heard_from: String,
    pub referral_code: String,
    pub successful_referrals_given: i32,
    pub referrals_used: i32,
    pub all_referrals_used: Vec<String>,
    pub subscription_status: SubscriptionTier,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub order_lunch: Vec<String>,
    pub order_dinner: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_address: Option<ConversationAddress>,
}

impl UserProfile {
    /// Builds a fresh profile from a completed draft.
    pub fn from_draft(phone: &str, draft: &DraftProfile, referral_code: String) -> Self {
        Self {
            phone: phone.to_string(),
            name: draft.name.clone().unwrap_or_default(),
            office_address: draft.office_address.clone().unwrap_or_default(),
            home_address: draft.home_address.clone().unwrap_or_default(),
            heard_from: draft.heard_from.clone().unwrap_or_default(),
            referral_code,
            successful_referrals_given: 0,
            referrals_used: 0,
            all_referrals_used: Vec::new(),
            subscription_status: SubscriptionTier::None,
            subscription_end_date: None,
            order_lunch: Vec::new(),
            order_dinner: Vec::new(),
            conversation_address: None,
        }
    }

    /// Copies the editable fields of a completed draft onto this profile.
    pub fn apply_draft(&mut self, draft: &DraftProfile) {
        if let Some(name) = &draft.name {
            self.name = name.clone();
        }
        if let Some(office) = &draft.office_address {
            self.office_address = office.clone();
        }
        if let Some(home) = &draft.home_address {
            self.home_address = home.clone();
        }
        if let Some(heard) = &draft.heard_from {
            self.heard_from = heard.clone();
        }
    }

    pub fn default_items(&self, meal: MealType) -> &[String] {
        match meal {
            MealType::Lunch => &self.order_lunch,
            MealType::Dinner => &self.order_dinner,
        }
    }

    pub fn subscription_active(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status != SubscriptionTier::None
            && self.subscription_end_date.is_none_or(|end| end > now)
    }

    /// Sets the tier and restarts the subscription period at `now`.
    pub fn subscribe(&mut self, tier: SubscriptionTier, now: DateTime<Utc>) {
        self.subscription_status = tier;
        self.subscription_end_date = Some(now + Duration::days(SUBSCRIPTION_DAYS));
    }

    pub fn set_default_items(&mut self, meal: MealType, items: Vec<String>) {
        match meal {
            MealType::Lunch => self.order_lunch = items,
            MealType::Dinner => self.order_dinner = items,
        }
    }
}

pub const SUBSCRIPTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionUpdateRequest {
    pub phone: String,
    pub tier: SubscriptionTier,
}

/// `mealType` stays a plain string on the wire so an unknown value is
/// reported against that field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DefaultOrderRequest {
    pub phone: String,
    pub items: Vec<String>,
    #[serde(rename = "mealType")]
    pub meal_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    pub subscription_status: SubscriptionTier,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

impl From<&UserProfile> for SubscriptionStatusResponse {
    fn from(profile: &UserProfile) -> Self {
        Self {
            subscription_status: profile.subscription_status,
            subscription_end_date: profile.subscription_end_date,
        }
    }
}

/// Answers collected during onboarding or a profile update, not yet committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heard_from: Option<String>,
}

impl DraftProfile {
    pub fn for_phone(phone: &str) -> Self {
        Self {
            phone: Some(phone.to_string()),
            ..Self::default()
        }
    }

    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            phone: Some(profile.phone.clone()),
            name: Some(profile.name.clone()),
            office_address: Some(profile.office_address.clone()),
            home_address: Some(profile.home_address.clone()),
            heard_from: Some(profile.heard_from.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_validation_accepts_only_ten_ascii_digits() {
        assert!(is_valid_phone("9876543210"));
        assert!(is_valid_phone("0000000000"));
        for bad in [
            "",
            "987654321",
            "98765432101",
            "98765x3210",
            "+919876543210",
            "98765 43210",
            "987-654-3210",
            "٩٨٧٦٥٤٣٢١٠",
            "9876543210\n",
        ] {
            assert!(!is_valid_phone(bad), "{bad:?} must be rejected");
        }
    }

    #[test]
    fn meal_type_parse_is_case_insensitive() {
        assert_eq!(MealType::parse("Lunch"), Some(MealType::Lunch));
        assert_eq!(MealType::parse(" dinner "), Some(MealType::Dinner));
        assert_eq!(MealType::parse("breakfast"), None);
    }

    #[test]
    fn tier_coverage_matches_meal() {
        assert!(SubscriptionTier::Monthly.covers(MealType::Lunch));
        assert!(SubscriptionTier::Monthly.covers(MealType::Dinner));
        assert!(SubscriptionTier::MonthlyLunch.covers(MealType::Lunch));
        assert!(!SubscriptionTier::MonthlyLunch.covers(MealType::Dinner));
        assert!(!SubscriptionTier::None.covers(MealType::Lunch));
    }

    #[test]
    fn tier_serializes_with_legacy_names() {
        let json = serde_json::to_string(&SubscriptionTier::MonthlyDinner).unwrap();
        assert_eq!(json, "\"Monthly_Dinner\"");
        assert_eq!(SubscriptionTier::parse("Monthly_Lunch"), Some(SubscriptionTier::MonthlyLunch));
        assert_eq!(SubscriptionTier::parse("weekly"), None);
    }

    #[test]
    fn draft_applies_only_collected_fields() {
        let draft = DraftProfile {
            phone: Some("9876543210".into()),
            name: Some("Asha".into()),
            office_address: Some("Tower B".into()),
            home_address: Some("Lake Road".into()),
            heard_from: Some("Friend".into()),
        };
        let mut profile = UserProfile::from_draft("9876543210", &draft, "HB10123".into());
        assert_eq!(profile.name, "Asha");

        let update = DraftProfile {
            name: Some("Asha K".into()),
            ..DraftProfile::default()
        };
        profile.apply_draft(&update);
        assert_eq!(profile.name, "Asha K");
        assert_eq!(profile.office_address, "Tower B");
        assert_eq!(profile.referral_code, "HB10123");
    }

    #[test]
    fn expired_subscription_is_inactive() {
        let now = Utc::now();
        let mut profile =
            UserProfile::from_draft("9876543210", &DraftProfile::default(), "HB10001".into());
        assert!(!profile.subscription_active(now));
        profile.subscription_status = SubscriptionTier::Monthly;
        profile.subscription_end_date = Some(now + Duration::days(3));
        assert!(profile.subscription_active(now));
        profile.subscription_end_date = Some(now - Duration::days(1));
        assert!(!profile.subscription_active(now));
    }

    #[test]
    fn subscribe_runs_thirty_days_from_now() {
        let now = Utc::now();
        let mut profile =
            UserProfile::from_draft("9876543210", &DraftProfile::default(), "HB10001".into());
        profile.subscribe(SubscriptionTier::MonthlyLunch, now);
        assert_eq!(profile.subscription_end_date, Some(now + Duration::days(30)));
        assert_eq!(
            SubscriptionStatusResponse::from(&profile).subscription_status,
            SubscriptionTier::MonthlyLunch
        );
    }

    #[test]
    fn status_response_uses_camel_case() {
        let response = SubscriptionStatusResponse {
            subscription_status: SubscriptionTier::Monthly,
            subscription_end_date: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["subscriptionStatus"], "Monthly");
        assert!(json.get("subscriptionEndDate").is_some());
    }
}
