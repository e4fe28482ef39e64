use clap::Subcommand;
use serde_json::json;

use healthybites_core::profile::{MealType, SubscriptionTier};

use crate::util::{Output, api_request, exit_error};

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Show subscription status for a phone
    Status {
        #[arg(long)]
        phone: String,
    },
    /// Set the subscription tier (runs 30 days from now)
    Subscribe {
        #[arg(long)]
        phone: String,
        /// None, Monthly, Monthly_Lunch or Monthly_Dinner
        #[arg(long)]
        tier: String,
    },
    /// Save the default order used by subscription auto-orders
    DefaultOrder {
        #[arg(long)]
        phone: String,
        /// lunch or dinner
        #[arg(long)]
        meal: String,
        /// Item name (repeat for several items)
        #[arg(long = "item", required = true)]
        items: Vec<String>,
    },
}

pub async fn run(api_url: &str, command: ProfileCommands, output: Output) -> i32 {
    match command {
        ProfileCommands::Status { phone } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/profiles/{phone}"),
                None,
                output,
            )
            .await
        }
        ProfileCommands::Subscribe { phone, tier } => {
            let Some(tier) = SubscriptionTier::parse(&tier) else {
                exit_error(
                    &format!("Unknown tier '{tier}'"),
                    Some("Use None, Monthly, Monthly_Lunch or Monthly_Dinner"),
                );
            };
            api_request(
                api_url,
                reqwest::Method::POST,
                "/v1/subscriptions",
                Some(json!({"phone": phone, "tier": tier})),
                output,
            )
            .await
        }
        ProfileCommands::DefaultOrder { phone, meal, items } => {
            let Some(meal) = MealType::parse(&meal) else {
                exit_error(&format!("Unknown meal '{meal}'"), Some("Use lunch or dinner"));
            };
            api_request(
                api_url,
                reqwest::Method::POST,
                "/v1/default-orders",
                Some(json!({"phone": phone, "items": items, "mealType": meal.as_str()})),
                output,
            )
            .await
        }
    }
}
