mod common;

use apns_relay::adapters::credentials::InMemoryCredentialStore;
use apns_relay::config::Config;
use apns_relay::domain::gateway::{Environment, Purpose};
use apns_relay::domain::registration::Invalidation;
use apns_relay::AppBuilder;
use clap::Parser;
use common::{FakeGateway, FeedbackItem, TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

fn test_config() -> Config {
    Config::try_parse_from([
        "apns-relay",
        "--sandbox",
        "--feedback-interval-secs",
        "1",
        "--reap-interval-secs",
        "1",
        "--max-idle-secs",
        "300",
    ])
    .unwrap()
}

#[tokio::test]
async fn test_feedback_worker_reconciles_on_schedule() {
    common::setup_tracing();
    let registered_at = OffsetDateTime::now_utc() - time::Duration::hours(1);

    let store = InMemoryCredentialStore::new();
    store.register_at(Uuid::new_v4(), "TOK-GONE", registered_at);
    store.register_at(Uuid::new_v4(), "TOK-KEPT", registered_at);

    let gateway = FakeGateway::new();
    gateway.script_feedback(vec![FeedbackItem::Report(Invalidation {
        token: "TOK-GONE".to_string(),
        invalidated_at: OffsetDateTime::now_utc(),
    })]);

    let app = AppBuilder::new(test_config())
        .with_connector(gateway.connector())
        .with_credential_store(Arc::new(store.clone()))
        .build();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = app.workers.spawn_all(shutdown_rx);

    let mut success = false;
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if !store.contains("TOK-GONE") {
            success = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = shutdown_tx.send(true);
    futures::future::join_all(tasks).await;

    assert!(success, "The invalidated registration should be deleted by the feedback worker");
    assert!(store.contains("TOK-KEPT"));
    assert!(gateway.closed() >= 1, "The reaper closes the feedback connection on shutdown");
}

#[tokio::test]
async fn test_reaper_shutdown_closes_push_connections() {
    common::setup_tracing();
    let gateway = FakeGateway::new();
    let app = AppBuilder::new(test_config()).with_connector(gateway.connector()).build();

    app.sender.send(Environment::Sandbox, &common::payload(&["TOK-1"]), TIMEOUT).await.unwrap();
    let handle = app.pool.handle(Environment::Sandbox, Purpose::Push).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tokio::spawn(app.workers.reaper.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_closed(), "A recently used connection is not idle");

    let _ = shutdown_tx.send(true);
    reaper.await.unwrap();

    assert!(handle.is_closed());
    assert!(app.pool.is_empty());
}
