use std::sync::Arc;

use chain::CheckpointValidator;
use containers::Bytes32;
use pretty_assertions::assert_eq;

use super::common::*;
use crate::server::SyncServer;
use crate::server::memory::extend_chain;
use crate::sync::{ChainSynchronizer, ForkOnKnownParent, HeaderDisposition, SyncConfig};
use crate::types::LiveSource;

#[tokio::test]
async fn test_live_header_extends_tip() {
    let server_chain = main_chain(20);
    let table = table_from(&server_chain);
    let (memory, server) = connected_server(9091, server_chain).await;

    let synchronizer = ChainSynchronizer::new(table.clone(), [server]);
    let monitors = synchronizer.monitor_servers();
    assert_eq!(monitors.len(), 1);
    assert!(wait_until(|| memory.subscriber_count() == 1).await);

    let mined = memory.mine(1);

    assert!(wait_until(|| table.height(0) == Some(21)).await);
    assert_eq!(
        table.with_chain(0, |chain| chain.tip_hash()),
        Some(mined[0].hash())
    );
    monitors.abort();
}

#[tokio::test]
async fn test_redelivered_header_is_ignored() {
    let server_chain = main_chain(20);
    let table = table_from(&server_chain);
    let (memory, server) = connected_server(9091, server_chain).await;

    let synchronizer = ChainSynchronizer::new(table.clone(), [server]);
    let monitors = synchronizer.monitor_servers();
    assert!(wait_until(|| memory.subscriber_count() == 1).await);

    let mined = memory.mine(1);
    assert!(wait_until(|| table.height(0) == Some(21)).await);

    memory.announce(&mined[0]);
    memory.announce(&mined[0]);
    let next = memory.mine(1);
    assert!(wait_until(|| table.height(0) == Some(22)).await);

    assert_eq!(table.with_chain(0, |chain| chain.len()), Some(23));
    assert_eq!(
        synchronizer.process_header(&mined[0]),
        HeaderDisposition::Duplicate
    );
    assert_eq!(
        synchronizer.process_header(&next[0]),
        HeaderDisposition::Duplicate
    );
    monitors.abort();
}

#[tokio::test]
async fn test_same_header_from_two_servers_is_saved_once() {
    let server_chain = main_chain(20);
    let table = table_from(&server_chain);
    let (first_memory, first) = connected_server(9091, server_chain.clone()).await;
    let (second_memory, second) = connected_server(9191, server_chain).await;

    let synchronizer = ChainSynchronizer::new(table.clone(), [first, second]);
    let monitors = synchronizer.monitor_servers();
    assert_eq!(monitors.len(), 2);
    assert!(
        wait_until(|| first_memory.subscriber_count() == 1
            && second_memory.subscriber_count() == 1)
        .await
    );

    let mined = first_memory.mine(1);
    second_memory.push_header(mined[0].clone()).unwrap();

    assert!(wait_until(|| table.height(0) == Some(21)).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(table.with_chain(0, |chain| chain.len()), Some(22));
    monitors.abort();
}

#[test]
fn test_orphan_is_dropped_by_default() {
    let headers = main_chain(10);
    let table = table_from(&headers);
    let synchronizer = ChainSynchronizer::new(table.clone(), Vec::<SyncServer>::new());

    let unknown_parent = extend_chain(&foreign_genesis(), 12, 0);
    let branch = extend_chain(&headers[6], 1, 900);

    assert_eq!(
        synchronizer.process_header(&unknown_parent[11]),
        HeaderDisposition::Orphaned
    );
    assert_eq!(
        synchronizer.process_header(&branch[0]),
        HeaderDisposition::Orphaned
    );
    assert_eq!(table.fork_heights(), vec![0]);
    assert_eq!(table.height(0), Some(10));
}

#[test]
fn test_orphan_with_known_parent_starts_fork() {
    let headers = main_chain(10);
    let table = table_from(&headers);
    let synchronizer = ChainSynchronizer::new(table.clone(), Vec::<SyncServer>::new())
        .with_orphan_policy(Arc::new(ForkOnKnownParent));

    let branch = extend_chain(&headers[6], 2, 900);

    assert_eq!(
        synchronizer.process_header(&branch[0]),
        HeaderDisposition::Forked(7)
    );
    assert_eq!(
        synchronizer.process_header(&branch[1]),
        HeaderDisposition::Appended(7)
    );
    assert_eq!(table.fork_heights(), vec![0, 7]);
    assert_eq!(table.height(7), Some(8));

    let unknown_parent = extend_chain(&foreign_genesis(), 12, 0);
    assert_eq!(
        synchronizer.process_header(&unknown_parent[11]),
        HeaderDisposition::Orphaned
    );
}

#[test]
fn test_invalid_live_header_is_rejected() {
    let headers = main_chain(10);
    let validator = CheckpointValidator::new().with_checkpoint(11, Bytes32::zero());
    let table = table_with_validator(&headers, Arc::new(validator));
    let synchronizer = ChainSynchronizer::new(table.clone(), Vec::<SyncServer>::new());

    let next = extend_chain(&headers[10], 1, 0);

    assert_eq!(
        synchronizer.process_header(&next[0]),
        HeaderDisposition::Rejected(0)
    );
    assert!(!table.contains(&next[0]));
    assert_eq!(table.height(0), Some(10));
}

#[tokio::test]
async fn test_block_feed_headers_land_at_corrected_height() {
    let server_chain = main_chain(20);
    let table = table_from(&server_chain);
    let (memory, server) = connected_server(9091, server_chain).await;

    let config = SyncConfig {
        live_source: LiveSource::Blocks,
        ..SyncConfig::default()
    };
    let synchronizer = ChainSynchronizer::new(table.clone(), [server]).with_config(config);
    let monitors = synchronizer.monitor_servers();
    assert!(wait_until(|| memory.subscriber_count() == 1).await);

    let mined = memory.mine(2);

    assert!(wait_until(|| table.height(0) == Some(22)).await);
    assert_eq!(
        table.with_chain(0, |chain| chain.tip_hash()),
        Some(mined[1].hash())
    );
    monitors.abort();
}

#[tokio::test]
async fn test_disconnect_stops_monitor() {
    let server_chain = main_chain(5);
    let table = table_from(&server_chain);
    let (memory, server) = connected_server(9091, server_chain).await;

    let monitors = ChainSynchronizer::new(table.clone(), [server.clone()]).monitor_servers();
    assert!(wait_until(|| memory.subscriber_count() == 1).await);

    server.disconnect().await;

    assert!(wait_until(|| monitors.is_finished()).await);
    memory.mine(1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(table.height(0), Some(5));
}

#[tokio::test]
async fn test_closed_subscription_marks_server_disconnected() {
    let server_chain = main_chain(5);
    let table = table_from(&server_chain);
    let (memory, server) = connected_server(9091, server_chain).await;

    let monitors = ChainSynchronizer::new(table, [server.clone()]).monitor_servers();
    assert!(wait_until(|| memory.subscriber_count() == 1).await);

    memory.close_subscriptions();

    assert!(wait_until(|| monitors.is_finished()).await);
    assert!(!server.is_connected());
}

#[tokio::test]
async fn test_only_connected_servers_are_monitored() {
    let server_chain = main_chain(5);
    let table = table_from(&server_chain);
    let (_memory, connected) = connected_server(9091, server_chain.clone()).await;
    let idle = crate::server::SyncServer::new(Arc::new(crate::server::MemoryServer::new(
        endpoint(9191),
        server_chain,
    )));

    let monitors = ChainSynchronizer::new(table, [connected.clone(), idle]).monitor_servers();

    assert_eq!(monitors.endpoints().collect::<Vec<_>>(), vec![connected.endpoint()]);
    monitors.abort();
}
