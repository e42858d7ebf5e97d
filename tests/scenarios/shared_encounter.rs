//! Shared encounter scenario tests
//!
//! A game master and players each run their own `CombatSession` against
//! the same server; every change must reach every attached client.

use std::time::Duration;

use encounter::combat::{
    AbilityScores, CharacterClass, ClassResources, CombatPhase, CustomEntry, EntryKind,
    PlayerCharacter, Roster, ScriptedRoller, SpellSlots, StatBlock,
};
use encounter::sync::SyncError;
use encounter::CombatSession;
use serde_json::Value;

use crate::harness::{wait_for, TestServer, PROPAGATION_TIMEOUT};

fn roster() -> Roster {
    Roster {
        monsters: vec![
            StatBlock {
                id: "goblin".to_string(),
                name: "Goblin".to_string(),
                dexterity: 14,
                hp: 7,
                max_hp: 7,
                armor_class: Some(15),
            },
            StatBlock {
                id: "ogre".to_string(),
                name: "Ogre".to_string(),
                dexterity: 8,
                hp: 59,
                max_hp: 59,
                armor_class: Some(11),
            },
        ],
        npcs: vec![],
        characters: vec![PlayerCharacter {
            id: "pc-monk".to_string(),
            name: "Kwai".to_string(),
            class: CharacterClass::Monk,
            abilities: AbilityScores {
                dex: 18,
                ..AbilityScores::default()
            },
            hp: 27,
            max_hp: 27,
            armor_class: Some(16),
            spell_slots: SpellSlots::default(),
            resources: ClassResources::for_class(CharacterClass::Monk, |_| 4),
        }],
    }
}

async fn session(server: &TestServer) -> CombatSession {
    server
        .open_session("campaign-1")
        .await
        .expect("Failed to open session")
}

/// Test: Players follow the master's encounter from setup to clear
#[tokio::test]
async fn test_players_follow_master() {
    let server = TestServer::start().await.expect("Failed to start server");
    let roster = roster();

    let master = session(&server).await;
    let player = session(&server).await;
    let _attached = player.attach().await.expect("attach failed");

    master
        .add_from_roster(&roster, EntryKind::Monster, "goblin")
        .await
        .unwrap();
    master
        .add_from_roster(&roster, EntryKind::Monster, "ogre")
        .await
        .unwrap();
    master
        .add_from_roster(&roster, EntryKind::PlayerCharacter, "pc-monk")
        .await
        .unwrap();
    master
        .roll_initiative_for_all_with(&mut ScriptedRoller::new([10, 10, 10]))
        .await
        .unwrap();
    assert!(master.start_combat().await.unwrap());

    let seen = wait_for(&player, |s| s.on_combat).await;
    let order: Vec<&str> = seen.sorted_order().iter().map(|e| e.id.as_str()).collect();
    // monk 14, goblin 12, ogre 9
    assert_eq!(order, vec!["pc-monk", "goblin", "ogre"]);
    assert_eq!(seen.initiative_rolls.len(), 3);

    for _ in 0..3 {
        master.next_turn().await.unwrap();
    }
    let seen = wait_for(&player, |s| s.round == 2).await;
    assert_eq!(seen.current_turn, 0);
    assert_eq!(seen.current_entry().unwrap().id, "pc-monk");

    master.update_hp("ogre", -20).await.unwrap();
    let seen = wait_for(&player, |s| s.entry("ogre").is_some_and(|e| e.hp == 39)).await;
    assert_eq!(seen.phase(), CombatPhase::Active);

    master.clear_all().await.unwrap();
    let seen = wait_for(&player, |s| s.phase() == CombatPhase::Idle).await;
    assert_eq!(seen.round, 1);
    assert_eq!(
        server
            .get(&TestServer::combat_path("campaign-1"))
            .await
            .unwrap()
            .status(),
        404
    );
}

/// Test: A late-opened session loads what is already there
#[tokio::test]
async fn test_late_joiner_loads_current_state() {
    let server = TestServer::start().await.expect("Failed to start server");

    let master = session(&server).await;
    master
        .add_custom(&CustomEntry {
            name: "Bandit Captain".to_string(),
            initiative: Some(15),
            hp: 65,
            max_hp: 65,
            ac: Some(15),
        })
        .await
        .unwrap()
        .expect("custom entry rejected");
    master.start_combat().await.unwrap();

    let late = session(&server).await;
    let state = late.snapshot();
    assert!(state.on_combat);
    assert_eq!(state.initiative_entries.len(), 1);
    assert_eq!(state.initiative_entries[0].kind, EntryKind::Custom);
}

/// Test: Edits from either side reach the other
#[tokio::test]
async fn test_both_directions() {
    let server = TestServer::start().await.expect("Failed to start server");
    let roster = roster();

    let master = session(&server).await;
    let player = session(&server).await;
    let _master_attached = master.attach().await.expect("attach failed");
    let _player_attached = player.attach().await.expect("attach failed");

    master
        .add_from_roster(&roster, EntryKind::PlayerCharacter, "pc-monk")
        .await
        .unwrap();
    wait_for(&player, |s| s.entry("pc-monk").is_some()).await;

    // The player tracks their own temporary hit points
    player.update_temp_hp("pc-monk", 5).await.unwrap();
    let seen = wait_for(&master, |s| {
        s.entry("pc-monk").is_some_and(|e| e.temp_hp() == 5)
    })
    .await;
    assert_eq!(seen.entry("pc-monk").unwrap().hp, 27);
}

/// Test: Concurrent edits resolve to whichever write landed last
#[tokio::test]
async fn test_last_write_wins() {
    let server = TestServer::start().await.expect("Failed to start server");
    let roster = roster();

    let master = session(&server).await;
    master
        .add_from_roster(&roster, EntryKind::Monster, "ogre")
        .await
        .unwrap();

    // The player's view is stale: it is not following changes yet
    let player = session(&server).await;
    let _master_attached = master.attach().await.expect("attach failed");

    // Both start from hp 59 and write their own entry list
    master.update_hp("ogre", -10).await.unwrap();
    player.update_hp("ogre", -30).await.unwrap();

    // The player's write landed last: the master's hit is lost
    let master_view = wait_for(&master, |s| s.entry("ogre").is_some_and(|e| e.hp == 29)).await;
    assert_eq!(master_view, player.snapshot());

    let stored: Value = server
        .get(&TestServer::combat_path("campaign-1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored["initiativeEntries"][0]["hp"], 29);
}

/// Test: Removing a combatant who already acted keeps everyone on the same turn
#[tokio::test]
async fn test_removal_mid_combat() {
    let server = TestServer::start().await.expect("Failed to start server");
    let roster = roster();

    let master = session(&server).await;
    let player = session(&server).await;
    let _attached = player.attach().await.expect("attach failed");

    for id in ["goblin", "ogre"] {
        master
            .add_from_roster(&roster, EntryKind::Monster, id)
            .await
            .unwrap();
    }
    master
        .add_from_roster(&roster, EntryKind::PlayerCharacter, "pc-monk")
        .await
        .unwrap();
    master.start_combat().await.unwrap();
    master.next_turn().await.unwrap();
    master.next_turn().await.unwrap();
    // Order: monk 4, goblin 2, ogre -1; the ogre is acting
    assert_eq!(master.snapshot().current_entry().unwrap().id, "ogre");

    master.remove_entry("goblin").await.unwrap();
    let local = master.snapshot();
    assert_eq!(local.current_turn, 0);

    let seen = wait_for(&player, |s| {
        s.on_combat && s.entry("goblin").is_none() && s.initiative_entries.len() == 2
    })
    .await;
    assert_eq!(seen.current_turn, 0);
    assert_eq!(seen, local);
}

/// Test: Losing the server surfaces failures but keeps working locally
#[tokio::test]
async fn test_save_failure_keeps_local_state() {
    let server = TestServer::start().await.expect("Failed to start server");
    let roster = roster();

    let master = session(&server).await;
    let mut failures = master.sync_failures();
    drop(server);

    let result = master
        .add_from_roster(&roster, EntryKind::Monster, "goblin")
        .await;
    assert!(matches!(result, Err(SyncError::Http(_))));
    assert_eq!(master.snapshot().initiative_entries.len(), 1);

    let failure = failures.recv().await.expect("no failure reported");
    assert_eq!(failure.operation, "save");
    assert_eq!(failure.campaign_id, "campaign-1");
}

/// Test: Losing the server while following reports it and ends the feed
#[tokio::test]
async fn test_server_loss_ends_following() {
    let server = TestServer::start().await.expect("Failed to start server");

    let player = session(&server).await;
    let mut failures = player.sync_failures();
    let attached = player.attach().await.expect("attach failed");
    assert!(attached.is_active());

    drop(server);

    let failure = tokio::time::timeout(PROPAGATION_TIMEOUT, failures.recv())
        .await
        .expect("server loss not reported")
        .expect("failure feed closed");
    assert_eq!(failure.operation, "subscribe");
    assert_eq!(failure.campaign_id, "campaign-1");

    tokio::time::timeout(PROPAGATION_TIMEOUT, async {
        while attached.is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription still active after server loss");
}

/// Test: A client's WebSocket closes once nobody follows the campaign
#[tokio::test]
async fn test_unfollowed_feed_is_closed() {
    let server = TestServer::start().await.expect("Failed to start server");
    let store = server.http_store().expect("Failed to build store");

    let player = CombatSession::open(store.clone(), "campaign-1")
        .await
        .expect("Failed to open session");
    let attached = player.attach().await.expect("attach failed");
    assert_eq!(store.feed_count(), 1);

    drop(attached);

    // The next pushed change finds no listener
    let master = session(&server).await;
    master
        .add_custom(&CustomEntry {
            name: "Bandit".to_string(),
            initiative: Some(12),
            hp: 11,
            max_hp: 11,
            ac: Some(12),
        })
        .await
        .unwrap();
    master.start_combat().await.unwrap();

    tokio::time::timeout(PROPAGATION_TIMEOUT, async {
        while store.feed_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("feed still open with no listeners");

    // Following again opens a fresh feed
    let _attached = player.attach().await.expect("attach failed");
    assert_eq!(store.feed_count(), 1);
}
