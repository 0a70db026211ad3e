#![forbid(unsafe_code)]

mod common;

use common::*;
use orchestrator::enforcement::EnforcementRequest;
use orchestrator::persistence::AppSettings;
use orchestrator::sync::BlockListSynchronizer;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use usage::{AppStatus, TrackedApp, millis};

fn settings(manual_firewall_unblock: bool) -> AppSettings {
    AppSettings {
        allow_duration: 4 * DAY,
        manual_firewall_unblock,
    }
}

fn apps() -> Vec<TrackedApp> {
    vec![
        TrackedApp::new("org.example.game", AppStatus::Rare).with_last_used(START - millis(6 * DAY)),
        TrackedApp::new("org.example.maps", AppStatus::Rare).with_last_used(START - millis(2 * DAY)),
        TrackedApp::new("org.example.chat", AppStatus::Recent).with_last_used(START),
        TrackedApp::new("org.example.off", AppStatus::Disabled),
    ]
}

fn synchronizer(h: &Harness) -> BlockListSynchronizer {
    BlockListSynchronizer::new(
        Arc::clone(&h.controller),
        h.clock.clone(),
        &config::Firewall::default(),
    )
}

#[tokio::test]
async fn pushes_only_on_change() {
    let h = harness().await;
    h.controller.block_now(None).await.unwrap();
    let sync = synchronizer(&h);

    assert!(sync.sync(&apps(), &settings(false)).await.unwrap());
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.game", "org.example.off"])
    );
    assert_eq!(
        h.enforcement.last(),
        Some(EnforcementRequest::Apply {
            blocking: true,
            packages: set(&["org.example.game", "org.example.off"]),
        })
    );

    let pushes = h.enforcement.count();
    assert!(!sync.sync(&apps(), &settings(false)).await.unwrap());
    assert_eq!(h.enforcement.count(), pushes);
}

#[tokio::test]
async fn first_sync_pushes_even_an_empty_set() {
    let h = harness().await;
    h.controller
        .apply_manual_block_list(set(&["stale"]))
        .await
        .unwrap();
    let sync = synchronizer(&h);

    assert!(sync.sync(&[], &settings(false)).await.unwrap());
    assert!(h.controller.state().blocked_packages.is_empty());
}

#[tokio::test]
async fn whitelisting_a_rare_package_unblocks_it() {
    let h = harness().await;
    h.controller.enable(None, None).await.unwrap();
    let sync = synchronizer(&h);
    sync.sync(&apps(), &settings(false)).await.unwrap();

    h.controller
        .update_whitelisted_packages(set(&["org.example.game"]))
        .await
        .unwrap();
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.off"])
    );

    // the desired set now differs from the last push
    assert!(sync.sync(&apps(), &settings(false)).await.unwrap());
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.off"])
    );
}

#[tokio::test]
async fn manual_unblock_retains_blocked_apps() {
    let h = harness().await;
    h.controller
        .block_now(Some(set(&["org.example.chat"])))
        .await
        .unwrap();
    let sync = synchronizer(&h);

    sync.sync(&apps(), &settings(true)).await.unwrap();
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.chat", "org.example.game", "org.example.off"])
    );

    let h = harness().await;
    h.controller
        .block_now(Some(set(&["org.example.chat"])))
        .await
        .unwrap();
    synchronizer(&h)
        .sync(&apps(), &settings(false))
        .await
        .unwrap();
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.game", "org.example.off"])
    );
}

#[tokio::test]
async fn invalidate_forces_a_push_after_unblock_expiry() {
    let h = harness().await;
    h.controller.block_now(None).await.unwrap();
    let sync = synchronizer(&h);
    sync.sync(&apps(), &settings(false)).await.unwrap();

    h.controller
        .temporarily_unblock("org.example.game", Some(10 * MINUTE))
        .await
        .unwrap();
    h.clock.advance(11 * MINUTE);
    assert!(!sync.sync(&apps(), &settings(false)).await.unwrap());
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.off"])
    );

    sync.invalidate().await;
    assert!(sync.sync(&apps(), &settings(false)).await.unwrap());
    assert_eq!(
        h.controller.state().blocked_packages,
        set(&["org.example.game", "org.example.off"])
    );
}
