//! Store API scenario tests
//!
//! Tests the session document endpoints directly

use serde_json::{json, Value};

use crate::harness::TestServer;

#[tokio::test]
async fn test_missing_session_is_404() {
    let server = TestServer::start().await.expect("Failed to start server");

    let resp = server.get(&TestServer::combat_path("nowhere")).await.unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nowhere"));
}

#[tokio::test]
async fn test_first_patch_creates_with_defaults() {
    let server = TestServer::start().await.expect("Failed to start server");
    let path = TestServer::combat_path("camp");

    let resp = server.patch(&path, &json!({"onCombat": true})).await.unwrap();
    assert_eq!(resp.status(), 200);

    let merged: Value = resp.json().await.unwrap();
    assert_eq!(merged["onCombat"], true);
    assert_eq!(merged["round"], 1);
    assert_eq!(merged["currentTurn"], 0);
    assert_eq!(merged["initiativeEntries"], json!([]));
    assert_eq!(merged["initiativeRolls"], json!({}));
}

#[tokio::test]
async fn test_patch_merges_only_present_fields() {
    let server = TestServer::start().await.expect("Failed to start server");
    let path = TestServer::combat_path("camp");

    let entries = json!([{
        "id": "goblin",
        "name": "Goblin",
        "type": "monster",
        "sourceId": "goblin",
        "initiative": 14,
        "dexMod": 2,
        "hp": 7,
        "maxHp": 7
    }]);
    server
        .patch(&path, &json!({"initiativeEntries": entries, "round": 3}))
        .await
        .unwrap();
    server
        .patch(&path, &json!({"currentTurn": 0, "onCombat": true}))
        .await
        .unwrap();

    let doc: Value = server.get(&path).await.unwrap().json().await.unwrap();
    assert_eq!(doc["round"], 3);
    assert_eq!(doc["onCombat"], true);
    assert_eq!(doc["initiativeEntries"], entries);
}

#[tokio::test]
async fn test_delete_session() {
    let server = TestServer::start().await.expect("Failed to start server");
    let path = TestServer::combat_path("camp");

    server.patch(&path, &json!({"onCombat": true})).await.unwrap();

    let resp = server.delete(&path).await.unwrap();
    assert_eq!(resp.status(), 204);
    assert_eq!(server.get(&path).await.unwrap().status(), 404);

    // Deleting again is fine
    let resp = server.delete(&path).await.unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_malformed_patch_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");
    let path = TestServer::combat_path("camp");

    let resp = server.patch(&path, &json!({"round": "first"})).await.unwrap();
    assert!(resp.status().is_client_error());
    assert_eq!(server.get(&path).await.unwrap().status(), 404);
}

#[tokio::test]
async fn test_campaigns_are_isolated() {
    let server = TestServer::start().await.expect("Failed to start server");

    server
        .patch(&TestServer::combat_path("alpha"), &json!({"round": 5}))
        .await
        .unwrap();
    server
        .patch(&TestServer::combat_path("beta"), &json!({"round": 2}))
        .await
        .unwrap();
    server.delete(&TestServer::combat_path("beta")).await.unwrap();

    let alpha: Value = server
        .get(&TestServer::combat_path("alpha"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alpha["round"], 5);
}
