//! Credential models persisted per user.

pub mod credential;
pub mod pending;
pub mod secret;
