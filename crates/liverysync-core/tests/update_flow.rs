// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of LiverySync.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Full update lifecycle against a mock server: install, re-check, incremental
//! update, uninstall.

use liverysync_core::{
    CheckOutcome, ItemKind, ItemStatus, Phase, ProgressEvent, SyncConfig, UpdateOrchestrator,
    UpdateState,
};
use mockito::Server;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const FEED_V1: &str = "release-1\nnew;DesertCamo.zip\nnew;Squadron.zip\n";
const FEED_V2: &str = concat!(
    "release-2\ndelete;DesertCamo.zip\nnew;notes.txt\n\n",
    "release-1\nnew;DesertCamo.zip\nnew;Squadron.zip\n"
);

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .unwrap();
        } else {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

fn write_config(dir: &Path, server_url: &str) -> SyncConfig {
    let config_path = dir.join("liverysync.json");
    let json = serde_json::json!({
        "server_url": server_url,
        "content_root": dir.join("Liveries"),
        "data_dir": "state",
        "default_package": "f16",
        "packages": {
            "f16": { "name": "F-16C Viper", "folder": "F-16C", "remote_subfolder": "liveries" }
        }
    });
    fs::write(&config_path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
    SyncConfig::load_or_create(&config_path).unwrap()
}

#[tokio::test]
async fn test_install_update_uninstall() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new_async().await;

    let feed_v1 = server
        .mock("GET", "/liveries/f16_version.txt")
        .with_status(200)
        .with_body(FEED_V1)
        .expect(2)
        .create_async()
        .await;
    let desert = server
        .mock("GET", "/liveries/DesertCamo.zip")
        .with_status(200)
        .with_body(zip_bytes(&[
            ("description.lua", "livery = {}"),
            ("f16_body.dds", "body"),
        ]))
        .create_async()
        .await;
    let squadron = server
        .mock("GET", "/liveries/Squadron.zip")
        .with_status(200)
        .with_body(zip_bytes(&[
            ("Squadron/", ""),
            ("Squadron/description.lua", "livery = {}"),
            ("Squadron/tex/a.dds", "a"),
            ("__MACOSX/._a.dds", "junk"),
        ]))
        .create_async()
        .await;

    let config = write_config(dir.path(), &server.url());
    let package_dir = dir.path().join("Liveries/F-16C");
    let marker = dir.path().join("state/f16_version.txt");
    let mut orch = UpdateOrchestrator::from_config(config).unwrap();

    // First install from nothing
    let CheckOutcome::Updates(check) = orch.check_for_updates("f16").await.unwrap() else {
        panic!("expected updates on first run");
    };
    assert_eq!(check.local_version, None);
    assert_eq!(check.plan.to_download.len(), 2);
    assert!(check.plan.to_delete.is_empty());

    let mut events: Vec<ProgressEvent> = Vec::new();
    let mut sink = |event: ProgressEvent| events.push(event);
    let summary = orch.apply_plan(&check.plan, "f16", &mut sink).await.unwrap();
    orch.cleanup().unwrap();

    assert!(!summary.has_failures(), "{summary:?}");
    assert!(events.iter().all(|e| e.phase != Phase::Error));
    assert!(package_dir.join("DesertCamo/description.lua").exists());
    assert!(package_dir.join("DesertCamo/f16_body.dds").exists());
    assert!(package_dir.join("Squadron/tex/a.dds").exists());
    assert!(package_dir.join("__MACOSX/._a.dds").exists());
    assert!(!package_dir.join("DesertCamo.zip").exists());
    assert!(!package_dir.join("Squadron.zip").exists());
    assert_eq!(fs::read_to_string(&marker).unwrap(), FEED_V1);
    assert_eq!(orch.state(), UpdateState::Done);

    let tracked = orch.manifest().entries("f16").unwrap();
    assert!(tracked.iter().all(|e| !e.path.ends_with("DesertCamo.zip")));
    let dds = orch
        .manifest()
        .get("f16", &package_dir.join("Squadron/tex/a.dds"))
        .unwrap()
        .unwrap();
    assert!(dds.checksum.is_some());

    // Same feed again
    let outcome = orch.check_for_updates("f16").await.unwrap();
    assert!(matches!(outcome, CheckOutcome::UpToDate { .. }));

    desert.assert_async().await;
    squadron.assert_async().await;
    feed_v1.assert_async().await;
    feed_v1.remove_async().await;

    // Incremental release: one livery retired, a plain file added
    let feed_v2 = server
        .mock("GET", "/liveries/f16_version.txt")
        .with_status(200)
        .with_body(FEED_V2)
        .create_async()
        .await;
    let notes = server
        .mock("GET", "/liveries/notes.txt")
        .with_status(200)
        .with_body("read me")
        .create_async()
        .await;

    let CheckOutcome::Updates(check) = orch.check_for_updates("f16").await.unwrap() else {
        panic!("expected release-2 updates");
    };
    assert_eq!(check.local_version.as_deref(), Some("release-1"));
    assert_eq!(
        check.plan.to_download.iter().collect::<Vec<_>>(),
        vec!["notes.txt"]
    );
    assert_eq!(
        orch.existing_deletions(&check.plan, "f16").unwrap(),
        vec!["DesertCamo.zip".to_owned()]
    );

    let summary = orch
        .apply_plan(&check.plan, "f16", &mut liverysync_core::progress::NullSink)
        .await
        .unwrap();
    orch.cleanup().unwrap();

    assert_eq!(
        summary.outcome("notes.txt", ItemKind::Extract).unwrap().status,
        ItemStatus::Kept
    );
    assert_eq!(
        summary.outcome("DesertCamo.zip", ItemKind::Delete).unwrap().status,
        ItemStatus::Succeeded
    );
    assert!(!package_dir.join("DesertCamo").exists());
    assert!(package_dir.join("notes.txt").exists());
    assert_eq!(orch.local_version("f16").unwrap().as_deref(), Some("release-2"));

    feed_v2.assert_async().await;
    notes.assert_async().await;

    // Uninstall everything that was tracked
    let summary = orch
        .delete_installed("f16", &mut liverysync_core::progress::NullSink)
        .unwrap();

    assert!(!summary.has_failures(), "{summary:?}");
    assert!(!package_dir.join("Squadron").exists());
    assert!(!package_dir.join("notes.txt").exists());
    assert!(!package_dir.join("__MACOSX").exists());
    assert!(orch.manifest().list("f16").unwrap().is_empty());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_traversal_archive_is_kept() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new_async().await;
    let _feed = server
        .mock("GET", "/liveries/f16_version.txt")
        .with_status(200)
        .with_body("release-1\nnew;evil.zip\n")
        .create_async()
        .await;
    let _evil = server
        .mock("GET", "/liveries/evil.zip")
        .with_status(200)
        .with_body(zip_bytes(&[("pack/ok.txt", "ok"), ("../../outside.txt", "boom")]))
        .create_async()
        .await;

    let config = write_config(dir.path(), &server.url());
    let package_dir = dir.path().join("Liveries/F-16C");
    let mut orch = UpdateOrchestrator::from_config(config).unwrap();

    let CheckOutcome::Updates(check) = orch.check_for_updates("f16").await.unwrap() else {
        panic!("expected updates");
    };
    let summary = orch
        .apply_plan(&check.plan, "f16", &mut liverysync_core::progress::NullSink)
        .await
        .unwrap();

    assert_eq!(
        summary.outcome("evil.zip", ItemKind::Extract).unwrap().status,
        ItemStatus::Failed
    );
    assert!(package_dir.join("evil.zip").exists());
    assert!(!dir.path().join("outside.txt").exists());
    assert!(!dir.path().join("Liveries/outside.txt").exists());
}
