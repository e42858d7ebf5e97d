//! Integration Test Harness
//!
//! - `TestServer` - Spawns the real encounterd binary on a random port with
//!   an on-disk SQLite database
//! - `WatchClient` - Raw WebSocket watcher of one campaign's change feed
//!
//! # Example
//!
//! ```rust,ignore
//! use harness::TestServer;
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     let server = TestServer::start().await.unwrap();
//!     let master = server.open_session("camp").await.unwrap();
//!     let player = server.open_session("camp").await.unwrap();
//!     let _attached = player.attach().await.unwrap();
//!
//!     master.add_custom(&bandit()).await.unwrap();
//!     harness::wait_for(&player, |s| !s.initiative_entries.is_empty()).await;
//! }
//! ```

#![allow(dead_code)]

mod client;

use std::time::Duration;

use encounter::combat::CombatSessionState;
use encounter::CombatSession;

pub use client::WatchClient;
pub use server::TestServer;

/// How long a remote change may take to arrive
pub const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until the session's working copy satisfies `predicate`
pub async fn wait_for(
    session: &CombatSession,
    predicate: impl Fn(&CombatSessionState) -> bool,
) -> CombatSessionState {
    let mut watcher = session.watch();
    let result = tokio::time::timeout(PROPAGATION_TIMEOUT, async {
        loop {
            {
                let state = watcher.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            watcher.changed().await.expect("session dropped");
        }
    })
    .await;

    match result {
        Ok(state) => state,
        Err(_) => panic!(
            "Timed out waiting for campaign {}; last state: {:?}",
            session.campaign_id(),
            session.snapshot()
        ),
    }
}
