//! Live feed scenario tests
//!
//! Tests WebSocket push of session changes

use std::time::Duration;

use serde_json::json;

use crate::harness::TestServer;

/// Test: Every watcher gets the merged document after a write
#[tokio::test]
async fn test_watchers_receive_updates() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut master = server.watch("camp").await.expect("Failed to watch");
    let mut player = server.watch("camp").await.expect("Failed to watch");

    server
        .patch(&TestServer::combat_path("camp"), &json!({"onCombat": true}))
        .await
        .unwrap();

    for watcher in [&mut master, &mut player] {
        let msg = watcher.expect("updated").await.expect("no update");
        assert_eq!(msg["state"]["onCombat"], true);
        assert_eq!(msg["state"]["round"], 1);
    }
}

/// Test: Delete is pushed as a cleared change
#[tokio::test]
async fn test_watchers_receive_clear() {
    let server = TestServer::start().await.expect("Failed to start server");
    let path = TestServer::combat_path("camp");
    server.patch(&path, &json!({"round": 2})).await.unwrap();

    let mut watcher = server.watch("camp").await.expect("Failed to watch");
    server.delete(&path).await.unwrap();

    let msg = watcher.expect("cleared").await.expect("no clear");
    assert!(msg.get("state").is_none());
}

/// Test: Changes to other campaigns are not pushed
#[tokio::test]
async fn test_feed_is_per_campaign() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut watcher = server.watch("alpha").await.expect("Failed to watch");

    server
        .patch(&TestServer::combat_path("beta"), &json!({"round": 9}))
        .await
        .unwrap();
    watcher
        .expect_silence(Duration::from_millis(300))
        .await
        .expect("beta change leaked to alpha");

    server
        .patch(&TestServer::combat_path("alpha"), &json!({"round": 2}))
        .await
        .unwrap();
    let msg = watcher.expect("updated").await.expect("no update");
    assert_eq!(msg["state"]["round"], 2);
}

/// Test: Successive writes arrive in order
#[tokio::test]
async fn test_updates_arrive_in_write_order() {
    let server = TestServer::start().await.expect("Failed to start server");
    let path = TestServer::combat_path("camp");
    let mut watcher = server.watch("camp").await.expect("Failed to watch");

    for turn in 0..5 {
        server
            .patch(&path, &json!({"currentTurn": turn}))
            .await
            .unwrap();
    }

    for turn in 0..5 {
        let msg = watcher.expect("updated").await.expect("no update");
        assert_eq!(msg["state"]["currentTurn"], turn);
    }
}

/// Test: A watcher that hangs up does not disturb the others
#[tokio::test]
async fn test_disconnected_watcher_is_dropped() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut leaving = server.watch("camp").await.expect("Failed to watch");
    let mut staying = server.watch("camp").await.expect("Failed to watch");

    leaving.close().await.expect("close failed");
    drop(leaving);

    server
        .patch(&TestServer::combat_path("camp"), &json!({"round": 3}))
        .await
        .unwrap();
    let msg = staying.expect("updated").await.expect("no update");
    assert_eq!(msg["state"]["round"], 3);
}
