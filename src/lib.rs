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

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;
pub mod workers;

use crate::adapters::credentials::{CredentialStore, InMemoryCredentialStore};
use crate::adapters::push::{LoggingConnector, PushConnector};
use crate::config::Config;
use crate::services::{ConnectionPool, FeedbackReconciler, NotificationSender};
use crate::workers::{ConnectionReaperWorker, FeedbackWorker};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Background tasks owned by the process.
#[derive(Debug)]
pub struct Workers {
    pub reaper: ConnectionReaperWorker,
    pub feedback: FeedbackWorker,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.reaper.run(shutdown.clone()).instrument(tracing::info_span!("connection_reaper"))),
            tokio::spawn(self.feedback.run(shutdown).instrument(tracing::info_span!("feedback_worker"))),
        ]
    }
}

#[derive(Debug)]
pub struct App {
    pub pool: Arc<ConnectionPool>,
    pub sender: Arc<NotificationSender>,
    pub reconciler: Arc<FeedbackReconciler>,
    pub workers: Workers,
}

/// Composition root: one pool per process, shared by the sender and the reconciler.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    connector: Option<Arc<dyn PushConnector>>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, connector: None, store: None }
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn build(self) -> App {
        let config = self.config;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(LoggingConnector::new(config.gateway.cert_path.clone())));
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryCredentialStore::new()));

        let pool = Arc::new(ConnectionPool::new(connector));
        let acquire_timeout = config.pool.acquire_timeout();
        let sender = Arc::new(
            NotificationSender::new(Arc::clone(&pool), config.delivery.failure_policy())
                .with_acquire_timeout(acquire_timeout),
        );
        let reconciler =
            Arc::new(FeedbackReconciler::new(Arc::clone(&pool), store).with_acquire_timeout(acquire_timeout));

        let workers = Workers {
            reaper: ConnectionReaperWorker::new(Arc::clone(&pool), &config.pool),
            feedback: FeedbackWorker::new(Arc::clone(&reconciler), config.gateway.environment(), &config.feedback),
        };

        App { pool, sender, reconciler, workers }
    }
}

/// Flips the shutdown flag on ctrl-c or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}
