use super::*;
use shared::domain::{ConnectionId, SubscriptionTier, UserProfile};
use tempfile::TempDir;

async fn open_temp_storage() -> (TempDir, Storage) {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let storage = Storage::new(&url).await.expect("open storage");
    (dir, storage)
}

#[tokio::test]
async fn seeds_default_fleet_once_and_orders_by_ping() {
    let (_dir, storage) = open_temp_storage().await;

    let inserted = storage.seed_servers_if_empty().await.expect("seed");
    assert_eq!(inserted, 10);

    let again = storage.seed_servers_if_empty().await.expect("seed again");
    assert_eq!(again, 0);

    let servers = storage.list_active_servers().await.expect("list");
    assert_eq!(servers.len(), 10);
    assert_eq!(servers[0].city, "Berlin");
    assert!(servers.windows(2).all(|w| w[0].ping_ms <= w[1].ping_ms));
}

#[tokio::test]
async fn create_user_rejects_duplicate_email() {
    let (_dir, storage) = open_temp_storage().await;

    let created = storage
        .create_user("alice@example.com", "hash-a", "alice", SubscriptionTier::Premium)
        .await
        .expect("create")
        .expect("fresh email accepted");
    assert_eq!(created.email, "alice@example.com");
    assert_eq!(created.subscription_tier, SubscriptionTier::Premium);

    let duplicate = storage
        .create_user("alice@example.com", "hash-b", "alice2", SubscriptionTier::Premium)
        .await
        .expect("create call itself succeeds");
    assert!(duplicate.is_none());
}

#[tokio::test]
async fn credential_lookup_requires_matching_hash() {
    let (_dir, storage) = open_temp_storage().await;
    storage
        .create_user("bob@example.com", "right-hash", "bob", SubscriptionTier::Premium)
        .await
        .expect("create")
        .expect("created");

    let miss = storage
        .find_user_by_credentials("bob@example.com", "wrong-hash")
        .await
        .expect("lookup");
    assert!(miss.is_none());

    let hit = storage
        .find_user_by_credentials("bob@example.com", "right-hash")
        .await
        .expect("lookup")
        .expect("match");
    assert_eq!(hit.username, "bob");
}

#[tokio::test]
async fn connection_rows_open_and_close_once() {
    let (_dir, storage) = open_temp_storage().await;
    storage.seed_servers_if_empty().await.expect("seed");
    let user = storage
        .create_user("carol@example.com", "h", "carol", SubscriptionTier::Premium)
        .await
        .expect("create")
        .expect("created");

    let connection_id = ConnectionId::random();
    storage
        .open_connection(connection_id, user.id, 1, "10.8.4.2")
        .await
        .expect("open");

    assert!(storage
        .close_connection(connection_id, user.id)
        .await
        .expect("close"));
    // Second close has nothing left to match.
    assert!(!storage
        .close_connection(connection_id, user.id)
        .await
        .expect("close again"));
}

#[tokio::test]
async fn logs_come_back_newest_first() {
    let (_dir, storage) = open_temp_storage().await;
    let user = storage
        .create_user("dave@example.com", "h", "dave", SubscriptionTier::Premium)
        .await
        .expect("create")
        .expect("created");

    storage
        .append_connection_log(user.id, None, "Connecting...", "first")
        .await
        .expect("append");
    storage
        .append_connection_log(user.id, None, "Connected", "second")
        .await
        .expect("append");

    let logs = storage.list_logs_for_user(user.id, 50).await.expect("list");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].event_type, "Connected");
    assert_eq!(logs[1].event_type, "Connecting...");
}

#[tokio::test]
async fn saved_session_round_trips_and_clears() {
    let (_dir, storage) = open_temp_storage().await;
    let user = UserProfile {
        id: shared::domain::UserId(7),
        email: "eve@example.com".to_string(),
        username: "eve".to_string(),
        subscription_tier: SubscriptionTier::Premium,
    };

    assert!(storage.load_session("default").await.expect("load").is_none());

    storage.save_session("default", &user).await.expect("save");
    let restored = storage
        .load_session("default")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(restored, user);

    assert!(storage.clear_session("default").await.expect("clear"));
    assert!(storage.load_session("default").await.expect("load").is_none());
    assert!(!storage.clear_session("default").await.expect("clear empty"));
}
