use healthybites_core::conversation::{Card, Outbound};
use healthybites_core::menu::Menu;
use healthybites_core::profile::MealType;
use healthybites_core::windows::WindowKind;
use url::Url;

pub const WELCOME: &str = "Welcome to HealthyBites Express!";
pub const ASK_PHONE: &str = "To get started, may I have your phone number?";
pub const INVALID_PHONE: &str = "Please enter a valid 10-digit phone number.";
pub const OTP_SENT: &str = "We've sent a one-time code to your phone. Please enter it here.";
pub const OTP_SENT_UPDATE: &str =
    "To update your profile, please enter the one-time code we just sent to your phone.";
pub const OTP_SENT_CANCEL: &str =
    "To confirm the cancellation, please enter the one-time code we just sent to your phone.";
pub const OTP_RESENT: &str = "We've sent the code again.";
pub const OTP_PROMPT: &str = "Please enter the one-time code we sent you.";
pub const OTP_WRONG: &str = "That code is incorrect or has expired.";
pub const OTP_SEND_FAILED: &str =
    "We couldn't send the one-time code right now. Please try again in a moment.";
pub const RESEND_OPTION: &str = "Resend OTP";
pub const RESEND_COMMAND: &str = "resend otp";

pub const WELCOME_BACK: &str = "Welcome back! Here are your profile details:";
pub const ASK_UPDATE: &str = "Do you want to update this profile?";
pub const PROFILE_UNCHANGED: &str = "Okay, your profile remains unchanged.";
pub const ASK_NAME: &str = "Great! What is your name?";
pub const ASK_NAME_UPDATE: &str = "Let's update your profile. What is your name?";
pub const ASK_OFFICE: &str = "What is your office address?";
pub const ASK_HOME: &str = "What is your home address?";
pub const ASK_HEARD: &str = "How did you hear about HealthyBites Express?";
pub const HEARD_OPTIONS: [&str; 5] = [
    "Google Ads",
    "Social Media (Instagram, Facebook etc.)",
    "Friend",
    "Newspaper",
    "Other",
];
pub const PROFILE_CREATED: &str = "Profile created successfully! Here are your details:";
pub const PROFILE_UPDATED: &str = "Profile updated successfully! Here are your updated details:";

pub const ORDER_RECEIVED: &str =
    "We have received your order. Thank you for ordering with HealthyBites Express!";
pub const CANCEL_PROMPT: &str = "Are you sure you want to cancel this order?";
pub const ORDER_KEPT: &str = "Okay, your order stays as it is.";
pub const ORDER_CANCELED: &str = "Your order has been canceled.";
pub const ORDER_NOT_CANCELABLE: &str = "This order can no longer be canceled.";
pub const ORDER_NOT_FOUND: &str = "We couldn't find that order.";
pub const FEEDBACK_THANKS: &str = "Thank you for your feedback!";
pub const SOMETHING_WENT_WRONG: &str = "Sorry, something went wrong. Please try again.";

pub fn yes_no(prompt: &str) -> Outbound {
    Outbound::choice(prompt, &["Yes", "No"])
}

pub fn resend_choice(prompt: &str) -> Outbound {
    Outbound::choice(prompt, &[RESEND_OPTION])
}

pub fn heard_choice() -> Outbound {
    Outbound::choice(ASK_HEARD, &HEARD_OPTIONS)
}

pub fn ordering_closed() -> Outbound {
    let lunch = WindowKind::ordering(MealType::Lunch).window().start_time();
    let dinner = WindowKind::ordering(MealType::Dinner).window().start_time();
    Outbound::text(format!(
        "Ordering is closed right now. Please come back at {} for lunch or {} for dinner.",
        lunch.format("%-H:%M"),
        dinner.format("%-H:%M")
    ))
}

/// Menu text followed by the order-entry link for `phone`.
pub fn menu_with_order_entry(menu: &Menu, base_url: &Url, phone: &str) -> Vec<Outbound> {
    vec![
        Outbound::markdown(menu.to_markdown()),
        Outbound::card(Card::OrderEntry {
            url: order_entry_url(base_url, phone),
        }),
    ]
}

pub fn order_entry_url(base_url: &Url, phone: &str) -> String {
    let mut url = base_url.clone();
    url.set_path("/order");
    url.query_pairs_mut().clear().append_pair("phone", phone);
    url.to_string()
}
