#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use apns_relay::config::{Command, Config};
use apns_relay::domain::notification::{NotificationPayload, normalize_token};
use apns_relay::{AppBuilder, telemetry};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    let environment = config.gateway.environment();
    tracing::info!(%environment, cert = %config.gateway.cert_path.display(), "Starting push relay");

    let app = AppBuilder::new(config.clone()).build();

    match config.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            apns_relay::spawn_signal_handler(shutdown_tx);

            let worker_tasks = app.workers.spawn_all(shutdown_rx.clone());
            let mut grace_rx = shutdown_rx;

            tokio::select! {
                () = async {
                    futures::future::join_all(worker_tasks).await;
                } => {
                    tracing::info!("Background tasks finished.");
                }
                () = async {
                    let _ = grace_rx.wait_for(|&s| s).await;
                    tokio::time::sleep(Duration::from_secs(config.shutdown_timeout_secs)).await;
                } => {
                    tracing::warn!("Timeout waiting for background tasks to finish.");
                }
            }
        }
        Command::Send { tokens, title, body, badge } => {
            let targets = tokens.iter().map(|t| normalize_token(t)).collect();
            let payload = NotificationPayload::new(targets, title, body, badge)?;
            let result = app.sender.send(environment, &payload, config.delivery.send_timeout()).await;
            app.pool.shutdown_all().await;
            print_json(&result?)?;
        }
        Command::Feedback => {
            let report = app.reconciler.reconcile(environment, config.feedback.timeout()).await;
            app.pool.shutdown_all().await;
            print_json(&report?)?;
        }
    }

    telemetry_guard.shutdown();
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
