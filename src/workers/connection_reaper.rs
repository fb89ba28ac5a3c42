use crate::config::PoolConfig;
use crate::services::ConnectionPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Periodically closes gateway connections that have gone unused for too long, and closes
/// everything once shutdown is signalled.
#[derive(Debug)]
pub struct ConnectionReaperWorker {
    pool: Arc<ConnectionPool>,
    interval_secs: u64,
    max_idle: Duration,
}

impl ConnectionReaperWorker {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, config: &PoolConfig) -> Self {
        Self { pool, interval_secs: config.reap_interval_secs, max_idle: config.max_idle() }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.interval_secs == 0 {
            tracing::info!("Idle connection reaping is disabled (interval = 0)");
            let _ = shutdown.wait_for(|&s| s).await;
        } else {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = interval.tick() => {
                        self.pool.reap_idle(self.max_idle)
                            .instrument(tracing::debug_span!("reap_idle_connections"))
                            .await;
                    }
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Connection reaper shutting down, closing all gateway connections...");
        self.pool.shutdown_all().await;
    }
}
