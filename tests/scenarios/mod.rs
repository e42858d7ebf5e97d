//! Scenario tests for encounterd
//!
//! - Store API: document reads, partial merges and deletes over REST
//! - Live feed: WebSocket push of every write
//! - Shared encounter: game master and players driving one encounter
//!   through `CombatSession` over the network

pub mod live_feed;
pub mod shared_encounter;
pub mod store_api;
