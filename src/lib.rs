//! marketchat - realtime negotiation chat for an influencer marketplace
//!
//! The core is [`feed`]: a per-conversation message store with optimistic
//! sends, reconciliation against the authoritative backend and a realtime
//! change subscription. [`api`] and [`realtime`] are the production
//! implementations of its collaborator traits.

pub mod api;
pub mod auth;
pub mod config;
pub mod console;
pub mod feed;
pub mod matching;
pub mod models;
pub mod realtime;
