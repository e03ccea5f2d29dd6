//! Registry and lifecycle specs: persistence round-trips, ownership
//! policies, idempotent create/remove, edit rules.

use crate::prelude::*;
use tokio::io::AsyncWriteExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_remove_create_yields_a_fresh_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create server s port=36410").await;
    daemon.ok("start s").await;
    let mut conn = connect_tcp(36410).await;
    conn.write_all(b"hello\n").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    daemon.ok("remove s").await;
    let (status, body) = daemon.ctl("show s").await;
    assert_eq!(status, 1, "{}", body);

    daemon.ok("create server s port=36410").await;
    let stats = daemon.ok("stats s").await;
    assert!(stats.contains("total_conns=0"), "fresh counters: {}", stats);
    assert!(stats.contains("msgs=0"), "fresh counters: {}", stats);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configuration_survives_a_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();

    let daemon = start_daemon(dir.path()).await;
    daemon.ok("create cache c port=36411").await;
    daemon.ok("edit c max-memory=4M eviction=allkeys-lru drain=on").await;
    daemon.ok("start c").await;
    let before = daemon.ok("show c").await;
    daemon.shutdown().await;

    // Restart against the same state dir.
    let daemon = start_daemon(dir.path()).await;
    let after = daemon.ok("show c").await;

    let before: serde_json::Value = serde_json::from_str(&before).unwrap();
    let after: serde_json::Value = serde_json::from_str(&after).unwrap();
    assert_eq!(before["config"], after["config"]);
    assert_eq!(before["id"], after["id"], "id stable across restarts");

    // was_running drove the autostart.
    let ps = daemon.ok("ps").await;
    assert!(ps.contains("c"), "autostarted: {}", ps);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_runtimes_do_not_autostart() {
    let dir = tempfile::tempdir().unwrap();

    let daemon = start_daemon(dir.path()).await;
    daemon.ok("create cache c port=36412").await;
    daemon.ok("start c").await;
    daemon.ok("stop c").await;
    daemon.shutdown().await;

    let daemon = start_daemon(dir.path()).await;
    let ls = daemon.ok("ls").await;
    assert!(ls.contains("c"));
    let ps = daemon.ok("ps").await;
    assert!(!ps.lines().skip(1).any(|l| l.starts_with("c ")), "not running: {}", ps);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_while_running_rejects_immutable_fields() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create server s port=36413").await;
    daemon.ok("start s").await;

    let (status, body) = daemon.ctl("edit s port=36414").await;
    assert_eq!(status, 1);
    assert!(body.contains("while running"), "{}", body);

    // Mutable fields go through.
    daemon.ok("edit s rate=10").await;

    daemon.ok("stop s").await;
    daemon.ok("edit s port=36414").await;
    let show = daemon.ok("show s").await;
    let spec: serde_json::Value = serde_json::from_str(&show).unwrap();
    assert_eq!(spec["config"]["port"], 36414);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn owner_stop_policy_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create server parent port=36415").await;
    daemon.ok("create server child-stop port=36416").await;
    daemon.ok("create server child-remove port=36417").await;
    daemon.ok("owner child-stop parent stop").await;
    daemon.ok("owner child-remove parent remove").await;
    daemon.ok("start parent").await;
    daemon.ok("start child-stop").await;
    daemon.ok("start child-remove").await;

    daemon.ok("stop parent").await;

    let ls = daemon.ok("ls").await;
    assert!(ls.contains("child-stop"), "stopped child still listed: {}", ls);
    assert!(!ls.contains("child-remove"), "removed child gone: {}", ls);

    let show = daemon.ok("show child-stop").await;
    let spec: serde_json::Value = serde_json::from_str(&show).unwrap();
    assert_eq!(spec["was_running"], false);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_rekeys_registry_and_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create cache old-name").await;
    daemon.ok("edit old-name name=new-name").await;

    let (status, _) = daemon.ctl("show old-name").await;
    assert_eq!(status, 1);
    daemon.ok("show new-name").await;
    assert!(dir.path().join("runtimes/new-name.json").exists());
    assert!(!dir.path().join("runtimes/old-name.json").exists());

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn glob_patterns_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create server web-1 port=36418").await;
    daemon.ok("create server web-2 port=36419").await;
    daemon.ok("create cache db").await;

    let body = daemon.ok("start web-*").await;
    assert!(body.contains("web-1") && body.contains("web-2"), "{}", body);
    let ps = daemon.ok("ps").await;
    assert!(ps.contains("web-1") && ps.contains("web-2"));
    assert!(!ps.contains("db "));

    daemon.ok("stop web-*").await;
    daemon.ok("remove web-?").await;
    let ls = daemon.ok("ls").await;
    assert!(!ls.contains("web-1") && ls.contains("db"));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attach_registers_an_external_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("attach redis 6379 4242").await;
    let ls = daemon.ok("ls").await;
    assert!(ls.contains("redis") && ls.contains("(external)"), "{}", ls);

    // The daemon does not own its I/O: lifecycle commands are refused.
    let (status, body) = daemon.ctl("stop redis").await;
    assert_eq!(status, 1, "{}", body);
    let (status, _) = daemon.ctl("start redis").await;
    assert_eq!(status, 1);

    // But it can be removed.
    daemon.ok("remove redis").await;

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn import_creates_from_a_spec_file() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    daemon.ok("create server template port=36420").await;
    let json = daemon.ok("show template").await;
    let json = json.replace("template", "clone");
    let path = dir.path().join("clone.json");
    std::fs::write(&path, json).unwrap();

    daemon.ok(&format!("import {}", path.display())).await;
    let show = daemon.ok("show clone").await;
    let spec: serde_json::Value = serde_json::from_str(&show).unwrap();
    assert_eq!(spec["config"]["port"], 36420);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_commands_and_names_report_status_1() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start_daemon(dir.path()).await;

    let (status, _) = daemon.ctl("explode now").await;
    assert_eq!(status, 1);
    let (status, _) = daemon.ctl("start ghost").await;
    assert_eq!(status, 1);
    let (status, _) = daemon.ctl("create daemon x").await;
    assert_eq!(status, 1);
    let (status, _) = daemon.ctl("create server bad name").await;
    assert_eq!(status, 1);

    daemon.shutdown().await;
}
