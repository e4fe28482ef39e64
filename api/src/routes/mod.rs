pub mod health;
pub mod menu;
pub mod messages;
pub mod orders;
pub mod profiles;
