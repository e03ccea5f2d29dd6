//! Cache engine specs over real connections: line and RESP modes, type
//! conflicts, TTLs, pub/sub, snapshots, eviction.

use crate::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn type_conflict_leaves_value_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36310").await;
    daemon.ok("start c").await;

    let mut conn = connect_tcp(36310).await;
    conn.write_all(b"SET k 1\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "OK");
    conn.write_all(b"LPUSH k a\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "error: type conflict");
    conn.write_all(b"GET k\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "1");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resp_mode_is_autodetected_on_the_array_marker() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36311").await;
    daemon.ok("start c").await;

    let mut conn = connect_tcp(36311).await;
    conn.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$11\r\nhello world\r\n").await.unwrap();
    let mut reply = [0u8; 5];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"+OK\r\n");

    conn.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
    let mut reply = [0u8; 18];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"$11\r\nhello world\r\n");

    // Missing keys answer with the RESP nil bulk.
    conn.write_all(b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n").await.unwrap();
    let mut reply = [0u8; 5];
    conn.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"$-1\r\n");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pubsub_delivers_to_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36312").await;
    daemon.ok("start c").await;

    let mut sub = connect_tcp(36312).await;
    sub.write_all(b"SUBSCRIBE news\n").await.unwrap();
    assert_eq!(recv_line(&mut sub).await, "subscribe news 1");

    let mut publisher = connect_tcp(36312).await;
    publisher.write_all(b"PUBLISH news hello world\n").await.unwrap();
    assert_eq!(recv_line(&mut publisher).await, "1");
    assert_eq!(recv_line(&mut sub).await, "message news hello world");

    // Unsubscribed connections stop receiving.
    sub.write_all(b"UNSUBSCRIBE news\n").await.unwrap();
    assert_eq!(recv_line(&mut sub).await, "unsubscribe news 0");
    publisher.write_all(b"PUBLISH news again\n").await.unwrap();
    assert_eq!(recv_line(&mut publisher).await, "0");
    expect_silence(&mut sub, 200).await;

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ttl_expires_via_the_command_clock() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36313").await;
    daemon.ok("start c").await;

    let mut conn = connect_tcp(36313).await;
    conn.write_all(b"PSETEX k 200 v\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "OK");
    conn.write_all(b"GET k\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "v");

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    conn.write_all(b"GET k\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "nil");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lru_eviction_keeps_size_under_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36314 max-memory=1K eviction=allkeys-lru").await;
    daemon.ok("start c").await;

    let mut conn = connect_tcp(36314).await;
    let value = "x".repeat(100);
    for i in 0..100 {
        conn.write_all(format!("SET key{:03} {}\n", i, value).as_bytes()).await.unwrap();
        assert_eq!(recv_line(&mut conn).await, "OK");
    }
    conn.write_all(b"SIZE\n").await.unwrap();
    let size: usize = recv_line(&mut conn).await.parse().unwrap();
    assert!(size < 100, "eviction must have run, size = {}", size);
    // The most recently written key is retained.
    conn.write_all(b"GET key099\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, value);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_roundtrip_through_flush_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36315 access=admin").await;
    daemon.ok("start c").await;
    let snap = dir.path().join("keys.snap");

    let mut conn = connect_tcp(36315).await;
    for line in
        ["SET s1 v1\n", "RPUSH l a b\n", "SADD set m1 m2\n", "HSET h f v\n"]
    {
        conn.write_all(line.as_bytes()).await.unwrap();
        let _ = recv_line(&mut conn).await;
    }
    conn.write_all(format!("FLUSH {}\n", snap.display()).as_bytes()).await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "OK");

    conn.write_all(b"DEL s1 l set h\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "4");
    conn.write_all(b"SIZE\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "0");

    conn.write_all(format!("LOAD {}\n", snap.display()).as_bytes()).await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "4");
    conn.write_all(b"SIZE\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "4");
    conn.write_all(b"GET s1\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "v1");
    conn.write_all(b"LRANGE l 0 -1\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "a b");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readonly_cache_rejects_mutations_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c port=36316 access=readonly").await;
    daemon.ok("start c").await;

    let mut conn = connect_tcp(36316).await;
    conn.write_all(b"SET k v\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "error: read only");
    conn.write_all(b"GET k\n").await.unwrap();
    assert_eq!(recv_line(&mut conn).await, "nil");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn action_exec_drives_the_cache_from_the_control_channel() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache c").await;
    daemon.ok("start c").await;

    daemon.ok("action c exec SET greeting hello").await;
    let body = daemon.ok("action c exec GET greeting").await;
    assert_eq!(body, "hello");
    let body = daemon.ok("send c INCR counter").await;
    assert_eq!(body, "1");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follower_applies_the_leader_mutation_stream() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache leader port=36317").await;
    daemon.ok("start leader").await;
    daemon.ok("create cache follower port=36318 replicate-from=127.0.0.1:36317").await;
    daemon.ok("start follower").await;

    // Give the SYNC handshake a moment.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let mut leader = connect_tcp(36317).await;
    leader.write_all(b"SET replicated yes\n").await.unwrap();
    assert_eq!(recv_line(&mut leader).await, "OK");

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let mut follower = connect_tcp(36318).await;
    follower.write_all(b"GET replicated\n").await.unwrap();
    assert_eq!(recv_line(&mut follower).await, "yes");

    daemon.shutdown().await;
}
