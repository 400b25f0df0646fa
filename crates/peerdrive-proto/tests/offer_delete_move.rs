//! Offer negotiation and structural propagation tests

mod common;

use std::time::Duration;

use peerdrive_core::domain::{
    AccessType, ChangeEvent, EventKind, ExchangeId, PathRecord, Sharer, VersionHash,
};
use peerdrive_core::ports::{IStorage, IVersionStore, StorageKind};
use peerdrive_proto::delete::DeleteExchange;
use peerdrive_proto::offer::{OfferExchange, OfferOutcome};
use peerdrive_proto::relocate::MoveExchange;
use peerdrive_proto::testing::LoopbackHub;

use common::{small_chunks, spawn_node};

const TIMEOUT: Duration = Duration::from_secs(5);

fn hash(s: &str) -> VersionHash {
    VersionHash::new(s).unwrap()
}

#[tokio::test]
async fn test_offer_accepted_by_own_devices() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());
    let node_c = spawn_node(&hub, "alice", "tablet", small_chunks());

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::created("new.txt", None),
        vec![node_b.device.clone(), node_c.device.clone()],
    );

    let OfferOutcome::Accepted { audience } = offer.run(TIMEOUT).await.unwrap() else {
        panic!("expected accepted outcome");
    };
    assert_eq!(audience.len(), 2);
}

#[tokio::test]
async fn test_offer_conflict_on_divergent_version() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    // b recorded a version the offer's baseline has never seen
    let mut record = PathRecord::new("notes.txt", "alice");
    record.add_version(hash("v2-theirs"));
    node_b.version_store.put(record);

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::modified("notes.txt", Some(hash("v1-base"))),
        vec![node_b.device.clone()],
    );

    assert_eq!(offer.run(TIMEOUT).await.unwrap(), OfferOutcome::Conflicted);
}

#[tokio::test]
async fn test_offer_matching_baseline_is_accepted() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    let mut record = PathRecord::new("notes.txt", "alice");
    record.add_version(hash("v1-base"));
    node_b.version_store.put(record);

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::modified("notes.txt", Some(hash("v1-base"))),
        vec![node_b.device.clone()],
    );

    assert!(matches!(
        offer.run(TIMEOUT).await.unwrap(),
        OfferOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn test_delete_offer_never_conflicts() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    // divergent history, but a delete carries no content to collide
    let mut record = PathRecord::new("notes.txt", "alice");
    record.add_version(hash("v2-theirs"));
    node_b.version_store.put(record);

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::deleted("notes.txt"),
        vec![node_b.device.clone()],
    );

    assert!(matches!(
        offer.run(TIMEOUT).await.unwrap(),
        OfferOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn test_offer_denied_without_write_access() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "mallory", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    node_b.version_store.put(PathRecord::new("theirs.txt", "alice"));

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::modified("theirs.txt", None),
        vec![node_b.device.clone()],
    );

    assert_eq!(offer.run(TIMEOUT).await.unwrap(), OfferOutcome::Denied);
}

#[tokio::test]
async fn test_offer_accepted_for_write_sharer() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "bob", "bobs-pc", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    let mut record = PathRecord::new("shared.txt", "alice");
    record.add_sharer(Sharer::new("bob", AccessType::Write));
    node_b.version_store.put(record);

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::modified("shared.txt", None),
        vec![node_b.device.clone()],
    );

    assert!(matches!(
        offer.run(TIMEOUT).await.unwrap(),
        OfferOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn test_offer_checks_access_on_shared_ancestor() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "bob", "bobs-pc", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    // the new file has no record yet; the shared folder above it does
    let mut record = PathRecord::new("shared-folder", "alice");
    record.is_shared = true;
    record.add_sharer(Sharer::new("bob", AccessType::Write));
    node_b.version_store.put(record);

    let offer = OfferExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        ChangeEvent::created("shared-folder/new-file.txt", None),
        vec![node_b.device.clone()],
    );

    assert!(matches!(
        offer.run(TIMEOUT).await.unwrap(),
        OfferOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn test_delete_removes_tree_and_strips_sharing() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    node_b
        .storage
        .persist(StorageKind::File, "dir/sub/deep.txt", 0, b"x")
        .await
        .unwrap();
    node_b
        .storage
        .persist(StorageKind::File, "dir/top.txt", 0, b"y")
        .await
        .unwrap();

    let mut record = PathRecord::new("dir/top.txt", "alice");
    record.add_sharer(Sharer::new("bob", AccessType::Read));
    node_b.version_store.put(record);

    let exchange = DeleteExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        "dir",
        vec![node_b.device.clone()],
    );
    assert!(exchange.run(TIMEOUT).await.unwrap());

    // the tree is gone
    assert!(!node_b.storage.is_dir("dir").await.unwrap());
    assert!(node_b.storage.content("dir/top.txt").is_none());

    // every element was ignore-marked for its deletion
    assert!(node_b.ignore.try_consume(EventKind::Delete, "dir"));
    assert!(node_b.ignore.try_consume(EventKind::Delete, "dir/top.txt"));
    assert!(node_b.ignore.try_consume(EventKind::Delete, "dir/sub"));
    assert!(node_b.ignore.try_consume(EventKind::Delete, "dir/sub/deep.txt"));

    // sharing metadata was stripped before deletion
    let record = node_b
        .version_store
        .get_record("dir/top.txt")
        .await
        .unwrap()
        .unwrap();
    assert!(record.sharers.is_empty());
    assert!(!record.is_shared);
    assert!(record.owner.is_none());
}

#[tokio::test]
async fn test_delete_of_absent_path_is_accepted() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    let exchange = DeleteExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        "never/existed.txt",
        vec![node_b.device.clone()],
    );

    // completes, and the reply carried ACCEPTED rather than ERROR
    assert!(exchange.run(TIMEOUT).await.unwrap());
}

#[tokio::test]
async fn test_delete_denied_for_read_only_sharer() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "bob", "bobs-pc", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    node_b
        .storage
        .persist(StorageKind::File, "shared.txt", 0, b"keep me")
        .await
        .unwrap();
    let mut record = PathRecord::new("shared.txt", "alice");
    record.add_sharer(Sharer::new("bob", AccessType::Read));
    node_b.version_store.put(record);

    let exchange = DeleteExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        "shared.txt",
        vec![node_b.device.clone()],
    );
    assert!(exchange.run(TIMEOUT).await.unwrap());

    // the reply was ACCESS_DENIED and nothing was removed
    assert_eq!(
        node_b.storage.content("shared.txt").unwrap(),
        b"keep me".to_vec()
    );
}

#[tokio::test]
async fn test_move_renames_and_marks_both_paths() {
    let hub = LoopbackHub::new();
    let node_a = spawn_node(&hub, "alice", "laptop", small_chunks());
    let node_b = spawn_node(&hub, "alice", "desktop", small_chunks());

    node_b
        .storage
        .persist(StorageKind::File, "old/name.txt", 0, b"moving")
        .await
        .unwrap();
    node_b.version_store.put(PathRecord::new("old/name.txt", "alice"));

    node_a
        .storage
        .persist(StorageKind::File, "target/name.txt", 0, b"moving")
        .await
        .unwrap();

    let exchange = MoveExchange::new(
        node_a.ctx.clone(),
        node_a.coordinator.clone(),
        ExchangeId::new(),
        "old/name.txt",
        "target/name.txt",
        vec![node_b.device.clone()],
    );
    assert!(exchange.run(TIMEOUT).await.unwrap());

    assert!(node_b.storage.content("old/name.txt").is_none());
    assert_eq!(
        node_b.storage.content("target/name.txt").unwrap(),
        b"moving".to_vec()
    );

    // a rename looks like delete+create to the watcher; both are marked
    assert!(node_b.ignore.try_consume(EventKind::Delete, "old/name.txt"));
    assert!(node_b.ignore.try_consume(EventKind::Create, "target/name.txt"));
    assert!(node_b.ignore.try_consume(EventKind::Modify, "target/name.txt"));

    // the record followed the file
    let record = node_b
        .version_store
        .get_record("target/name.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.path, "target/name.txt");
}
