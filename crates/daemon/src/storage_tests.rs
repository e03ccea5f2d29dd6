// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use socketley_core::{RuntimeConfig, RuntimeId, RuntimeKind};
use std::collections::BTreeMap;

fn spec(name: &str) -> RuntimeSpec {
    RuntimeSpec {
        id: RuntimeId::generate(),
        name: name.to_string(),
        created_at_ms: 1,
        was_running: false,
        config: RuntimeConfig::new(RuntimeKind::Server),
        meta: BTreeMap::new(),
    }
}

#[test]
fn save_load_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let sidecars = Sidecars::new(dir.path());

    sidecars.save(&spec("web")).unwrap();
    sidecars.save(&spec("api")).unwrap();

    let loaded = sidecars.load_all();
    assert_eq!(loaded.len(), 2);
    // Sorted by name.
    assert_eq!(loaded[0].name, "api");
    assert_eq!(loaded[1].name, "web");

    sidecars.delete("web");
    assert_eq!(sidecars.load_all().len(), 1);
    // Deleting again is fine.
    sidecars.delete("web");
}

#[test]
fn save_overwrites_existing() {
    let dir = tempfile::tempdir().unwrap();
    let sidecars = Sidecars::new(dir.path());

    let mut s = spec("web");
    sidecars.save(&s).unwrap();
    s.was_running = true;
    sidecars.save(&s).unwrap();

    let loaded = sidecars.load_all();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].was_running);
}

#[test]
fn corrupt_sidecar_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let sidecars = Sidecars::new(dir.path());
    sidecars.save(&spec("good")).unwrap();
    std::fs::write(sidecars.dir().join("bad.json"), b"{ not json").unwrap();

    let loaded = sidecars.load_all();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, "good");
}

#[test]
fn rename_moves_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let sidecars = Sidecars::new(dir.path());
    sidecars.save(&spec("old")).unwrap();
    sidecars.rename("old", "new").unwrap();

    let loaded = sidecars.load_all();
    assert_eq!(loaded.len(), 1);
    // File name changed; the stored name field is the caller's concern.
    assert!(dir.path().join("runtimes/new.json").exists());
}

#[test]
fn load_all_on_missing_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let sidecars = Sidecars::new(&dir.path().join("nested"));
    assert!(sidecars.load_all().is_empty());
}
