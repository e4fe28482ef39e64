//! Shared domain model for the HealthyBites ordering assistant.
//!
//! Nothing in this crate performs I/O: the service crate owns stores,
//! delivery and scheduling, and builds on the types and policies here.

pub mod codes;
pub mod conversation;
pub mod error;
pub mod menu;
pub mod orders;
pub mod profile;
pub mod windows;
