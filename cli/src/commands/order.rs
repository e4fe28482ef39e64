use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;

use crate::util::{Output, api_request, exit_error};

#[derive(Subcommand)]
pub enum OrderCommands {
    /// Submit an order the way the order-entry page does
    Create {
        /// 10-digit phone number
        #[arg(long)]
        phone: String,
        /// Item name (repeat for several items)
        #[arg(long = "item", required = true)]
        items: Vec<String>,
        /// Order total in rupees
        #[arg(long)]
        total: f64,
        /// Requested date (RFC3339). Defaults to now.
        #[arg(long)]
        date: Option<String>,
    },
}

pub async fn run(api_url: &str, command: OrderCommands, output: Output) -> i32 {
    match command {
        OrderCommands::Create {
            phone,
            items,
            total,
            date,
        } => {
            let date = match date.as_deref() {
                Some(raw) => parse_date(raw).unwrap_or_else(|e| {
                    exit_error(&e, Some("Use RFC3339, e.g. 2026-03-02T12:30:00+05:30"))
                }),
                None => Utc::now(),
            };
            let body = json!({
                "phone": phone,
                "items": items,
                "total": total,
                "date": date,
            });
            api_request(api_url, reqwest::Method::POST, "/v1/orders", Some(body), output).await
        }
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("Invalid --date '{raw}': {e}"))
}
