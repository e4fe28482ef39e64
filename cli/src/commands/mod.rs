pub mod chat;
pub mod health;
pub mod menu;
pub mod order;
pub mod profile;
