//! Integration tests for the Registry Actor.
//!
//! These tests drive the registry through `spawn_registry()` and the
//! `RegistryHandle` interface only, the way connection handlers do.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free policy covers
//! production code.

use std::time::Duration;

use natterd::registry::{spawn_registry, RegistryError, RegistryHandle, RegistrySettings};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

const SECRET: &str = "open-sesame";

fn spawn_with_secret() -> (RegistryHandle, CancellationToken) {
    let token = CancellationToken::new();
    let settings = RegistrySettings {
        shutdown_secret: Some(SECRET.to_string()),
        ..RegistrySettings::default()
    };
    (spawn_registry(settings, token.clone()), token)
}

fn spawn_default() -> RegistryHandle {
    spawn_registry(RegistrySettings::default(), CancellationToken::new())
}

async fn drain(handle: &RegistryHandle, name: &str) -> Vec<String> {
    handle
        .check_messages(name, None)
        .await
        .expect("check should succeed")
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_alice_and_bob_conversation() {
    let handle = spawn_default();

    handle.register("alice").await.expect("alice registers");
    handle.register("bob").await.expect("bob registers");

    assert_eq!(drain(&handle, "alice").await, vec!["bob has logged on"]);
    assert!(drain(&handle, "bob").await.is_empty());

    handle.say("alice", "hi").await.unwrap();
    assert_eq!(drain(&handle, "alice").await, vec!["alice says: hi"]);
    assert_eq!(drain(&handle, "bob").await, vec!["alice says: hi"]);

    handle.tell("bob", "alice", "psst").await.unwrap();
    assert_eq!(drain(&handle, "alice").await, vec!["bob tells you: psst"]);
    assert!(drain(&handle, "bob").await.is_empty());

    handle.tell("alice", "carol", "hello?").await.unwrap();
    assert_eq!(
        drain(&handle, "alice").await,
        vec!["carol is not logged on"]
    );

    handle.logout("bob").await.expect("bob logs out");
    assert_eq!(drain(&handle, "alice").await, vec!["bob has logged off"]);
    assert_eq!(handle.list("alice").await.unwrap(), vec!["alice"]);
}

#[tokio::test]
async fn test_list_preserves_registration_order() {
    let handle = spawn_default();

    for name in ["zed", "amy", "mo"] {
        handle.register(name).await.unwrap();
    }
    handle.logout("amy").await.unwrap();
    handle.register("amy").await.unwrap();

    assert_eq!(
        handle.list("zed").await.unwrap(),
        vec!["zed", "mo", "amy"]
    );
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let handle = spawn_default();

    handle.register("alice").await.unwrap();
    let result = handle.register("alice").await;
    assert_eq!(result, Err(RegistryError::NameConflict("alice".to_string())));

    // The failed attempt leaves no trace
    assert_eq!(handle.list("alice").await.unwrap(), vec!["alice"]);
    assert!(drain(&handle, "alice").await.is_empty());
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let handle = spawn_default();

    for bad in ["", "   ", "two words", "tab\tname"] {
        let result = handle.register(bad).await;
        assert!(
            matches!(result, Err(RegistryError::InvalidName(_))),
            "{bad:?} should be rejected"
        );
    }
    assert!(handle.list("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_full() {
    let settings = RegistrySettings {
        max_sessions: 2,
        ..RegistrySettings::default()
    };
    let handle = spawn_registry(settings, CancellationToken::new());

    handle.register("a").await.unwrap();
    handle.register("b").await.unwrap();
    assert_eq!(
        handle.register("c").await,
        Err(RegistryError::RegistryFull { max: 2 })
    );

    handle.logout("a").await.unwrap();
    handle.register("c").await.expect("room after logout");
}

#[tokio::test]
async fn test_logout_unknown_name() {
    let handle = spawn_default();
    assert_eq!(
        handle.logout("ghost").await,
        Err(RegistryError::SessionNotFound("ghost".to_string()))
    );
}

#[tokio::test]
async fn test_drain_is_exactly_once() {
    let handle = spawn_default();
    handle.register("alice").await.unwrap();

    handle.say("alice", "one").await.unwrap();
    handle.say("alice", "two").await.unwrap();

    assert_eq!(
        drain(&handle, "alice").await,
        vec!["alice says: one", "alice says: two"]
    );
    assert!(drain(&handle, "alice").await.is_empty());
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_broadcasts_arrive_in_one_order() {
    let handle = spawn_default();
    let names: Vec<String> = (0..5).map(|i| format!("user{i}")).collect();

    for name in &names {
        handle.register(name).await.unwrap();
    }
    for name in &names {
        drain(&handle, name).await;
    }

    let mut tasks = Vec::new();
    for sender in names.clone() {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20 {
                handle.say(&sender, &format!("msg{i}")).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let first = drain(&handle, &names[0]).await;
    assert_eq!(first.len(), 100);
    for name in &names[1..] {
        assert_eq!(drain(&handle, name).await, first, "{name} saw another order");
    }

    // Each sender's own messages keep their relative order
    for sender in &names {
        let own: Vec<&String> = first
            .iter()
            .filter(|m| m.starts_with(&format!("{sender} says:")))
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("{sender} says: msg{i}")).collect();
        assert_eq!(own, expected.iter().collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_of_same_name() {
    let handle = spawn_default();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move { handle.register("race").await }));
    }

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e, RegistryError::NameConflict("race".to_string())),
        }
    }
    assert_eq!(wins, 1);
}

// ============================================================================
// Long-Poll Tests
// ============================================================================

#[tokio::test]
async fn test_long_poll_wakes_on_message() {
    let handle = spawn_default();
    handle.register("alice").await.unwrap();
    handle.register("bob").await.unwrap();
    drain(&handle, "alice").await;

    let poller = handle.clone();
    let poll = tokio::spawn(async move {
        poller
            .check_messages("bob", Some(Duration::from_secs(10)))
            .await
    });

    sleep(Duration::from_millis(50)).await;
    handle.tell("alice", "bob", "wake up").await.unwrap();

    let batch = timeout(Duration::from_secs(2), poll)
        .await
        .expect("poll should return promptly")
        .unwrap()
        .unwrap();
    assert_eq!(batch, vec!["alice tells you: wake up"]);
}

#[tokio::test]
async fn test_long_poll_returns_pending_immediately() {
    let handle = spawn_default();
    handle.register("alice").await.unwrap();
    handle.say("alice", "already here").await.unwrap();

    let batch = timeout(
        Duration::from_secs(1),
        handle.check_messages("alice", Some(Duration::from_secs(10))),
    )
    .await
    .expect("should not wait")
    .unwrap();
    assert_eq!(batch, vec!["alice says: already here"]);
}

#[tokio::test]
async fn test_long_poll_timeout_loses_nothing() {
    let handle = spawn_default();
    handle.register("alice").await.unwrap();

    let batch = handle
        .check_messages("alice", Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(batch.is_empty());

    handle.say("alice", "after timeout").await.unwrap();
    assert_eq!(drain(&handle, "alice").await, vec!["alice says: after timeout"]);
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_wrong_secret_is_rejected() {
    let (handle, token) = spawn_with_secret();
    handle.register("mallory").await.unwrap();

    let result = handle.shutdown("mallory", "guess").await;
    assert_eq!(
        result,
        Err(RegistryError::Unauthorized {
            requester: "mallory".to_string()
        })
    );
    assert!(!token.is_cancelled());

    // Still serving
    handle.say("mallory", "still here").await.unwrap();
    assert_eq!(drain(&handle, "mallory").await, vec!["mallory says: still here"]);
}

#[tokio::test]
async fn test_shutdown_correct_secret_stops_registry() {
    let (handle, token) = spawn_with_secret();
    handle.register("admin").await.unwrap();

    handle.shutdown("admin", SECRET).await.expect("authorized");
    assert!(token.is_cancelled());

    sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.register("late").await, Err(RegistryError::Closed));
}

#[tokio::test]
async fn test_shutdown_disabled_without_secret() {
    let token = CancellationToken::new();
    let handle = spawn_registry(RegistrySettings::default(), token.clone());

    assert!(matches!(
        handle.shutdown("anyone", "").await,
        Err(RegistryError::Unauthorized { .. })
    ));
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn test_external_cancel_stops_registry() {
    let token = CancellationToken::new();
    let handle = spawn_registry(RegistrySettings::default(), token.clone());
    handle.register("alice").await.unwrap();

    token.cancel();
    sleep(Duration::from_millis(20)).await;

    assert_eq!(handle.list("alice").await, Err(RegistryError::Closed));
}
