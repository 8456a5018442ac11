//! Session and contact reconciliation core for a multi-number WhatsApp
//! dashboard.
//!
//! - [`whatsapp`]: numbers, connection lifecycle, contact reconciliation,
//!   chat selection and the realtime event dispatcher
//! - [`api`]: the dashboard backend REST contract and its reqwest client
//! - [`realtime`]: the room-scoped push channel over a websocket

#![warn(clippy::all, rust_2018_idioms)]

pub mod api;
pub mod app;
pub mod config;
pub mod realtime;
pub mod whatsapp;

#[cfg(test)]
mod test_utils;
