use std::io::{BufRead, Write};

use serde_json::json;

use healthybites_core::conversation::{Card, InboundAction, Outbound};

use crate::util::{Output, exit_code_for, exit_error, raw_api_request};

pub struct ChatArgs {
    pub conversation: String,
    pub service_url: Option<String>,
    pub text: Option<String>,
    pub action: Option<String>,
    /// Print the reply JSON instead of rendering it.
    pub json: bool,
}

/// Sends one turn when `--text` or `--action` is given, otherwise reads
/// turns from stdin until EOF or `/quit`.
pub async fn run(api_url: &str, args: ChatArgs, output: Output) -> i32 {
    if args.text.is_some() || args.action.is_some() {
        let action = args.action.as_deref().map(|raw| {
            parse_action(raw).unwrap_or_else(|e| {
                exit_error(
                    &e,
                    Some(r#"Example: --action '{"type":"request_cancel","order_id":"<uuid>"}'"#),
                )
            })
        });
        return turn(api_url, &args, args.text.as_deref(), action, output).await;
    }

    let stdin = std::io::stdin();
    let mut last_code = 0;
    prompt();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        last_code = if let Some(raw) = line.strip_prefix("/action ") {
            match parse_action(raw) {
                Ok(action) => turn(api_url, &args, None, Some(action), output).await,
                Err(e) => {
                    eprintln!("{e}");
                    4
                }
            }
        } else {
            turn(api_url, &args, Some(line), None, output).await
        };
        if last_code == 3 {
            return last_code;
        }
        prompt();
    }
    last_code
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn turn(
    api_url: &str,
    args: &ChatArgs,
    text: Option<&str>,
    action: Option<InboundAction>,
    output: Output,
) -> i32 {
    let body = json!({
        "conversation_id": args.conversation,
        "service_url": args.service_url,
        "text": text,
        "action": action,
    });
    let (status, resp) =
        match raw_api_request(api_url, reqwest::Method::POST, "/v1/messages", Some(body)).await {
            Ok(response) => response,
            Err(code) => return code,
        };
    let code = exit_code_for(status);
    if code != 0 {
        eprintln!("{}", output.format(&resp));
        return code;
    }
    if args.json {
        println!("{}", output.format(&resp));
        return 0;
    }
    match serde_json::from_value::<Vec<Outbound>>(resp["messages"].clone()) {
        Ok(messages) => {
            for message in &messages {
                println!("{}", render(message));
            }
            0
        }
        Err(e) => {
            eprintln!("Unexpected reply shape: {e}");
            2
        }
    }
}

fn parse_action(raw: &str) -> Result<InboundAction, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid action JSON: {e}"))
}

/// Plain-text rendering of one outbound message for a terminal.
pub fn render(message: &Outbound) -> String {
    match message {
        Outbound::Text { text } | Outbound::Markdown { text } => text.clone(),
        Outbound::Choice { prompt, options } => {
            let mut out = prompt.clone();
            for (i, option) in options.iter().enumerate() {
                out.push_str(&format!("\n  [{}] {option}", i + 1));
            }
            out
        }
        Outbound::Card { card } => render_card(card),
    }
}

fn render_card(card: &Card) -> String {
    match card {
        Card::ProfileSummary {
            name,
            phone,
            office_address,
            home_address,
            heard_from,
            referral_code,
        } => format!(
            "+ Profile\n| Name: {name}\n| Phone: {phone}\n| Office: {office_address}\n| Home: {home_address}\n| Heard from: {heard_from}\n| Referral code: {referral_code}"
        ),
        Card::OrderEntry { url } => format!("+ Place your order: {url}"),
        Card::OrderConfirmation {
            order_id,
            items,
            total,
        } => format!(
            "+ Order {order_id}\n| {}\n| Total: {total}",
            items.join(", ")
        ),
        Card::CancelConfirmation { order_id, items } => format!(
            "+ Cancel order {order_id}? ({})\n| /action {{\"type\":\"confirm_cancel\",\"order_id\":\"{order_id}\"}}\n| /action {{\"type\":\"keep_order\"}}",
            items.join(", ")
        ),
        Card::CancelOffer { order_id, items } => format!(
            "+ Order {order_id} ({}) can still be canceled\n| /action {{\"type\":\"request_cancel\",\"order_id\":\"{order_id}\"}}",
            items.join(", ")
        ),
        Card::FeedbackRequest { order_id, items } => format!(
            "+ How was order {order_id} ({})? Reply with your feedback.",
            items.join(", ")
        ),
    }
}
