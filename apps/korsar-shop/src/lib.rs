//! Core of the Telegram VPN subscription shop: purchase and renewal
//! state machine, payment reconciliation, panel provisioning and the
//! key lifecycle scheduler. The conversational bot layer and the admin
//! panel consume this crate; they are not part of it.

pub mod config;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;
pub mod xui;
