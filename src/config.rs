use crate::domain::gateway::Environment;
use crate::domain::notification::{DEFAULT_TRANSIENT_CODES, FailurePolicy};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// How long to wait for background workers when shutting down
    #[arg(long, env = "APNS_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    #[command(flatten)]
    pub gateway: GatewayConfig,

    #[command(flatten)]
    pub pool: PoolConfig,

    #[command(flatten)]
    pub delivery: DeliveryConfig,

    #[command(flatten)]
    pub feedback: FeedbackConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the connection reaper and feedback workers until interrupted (default)
    Serve,
    /// Send a single notification and print the delivery result as JSON
    Send {
        /// Device token to notify (repeatable)
        #[arg(long = "token", required = true)]
        tokens: Vec<String>,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        body: String,

        #[arg(long, default_value_t = 1)]
        badge: u32,
    },
    /// Run one feedback reconciliation and print the report as JSON
    Feedback,
}

#[derive(Clone, Debug, Args)]
pub struct GatewayConfig {
    /// Use the sandbox gateway instead of production
    #[arg(long, env = "APNS_SANDBOX", default_value_t = false)]
    pub sandbox: bool,

    /// Client certificate presented to the gateway
    #[arg(long, env = "APNS_CERT_PATH", default_value = "apns-cert.pem")]
    pub cert_path: PathBuf,
}

impl GatewayConfig {
    #[must_use]
    pub const fn environment(&self) -> Environment {
        Environment::from_sandbox_flag(self.sandbox)
    }
}

#[derive(Clone, Debug, Args)]
pub struct PoolConfig {
    /// Maximum time to wait for a gateway connection
    #[arg(long, env = "APNS_ACQUIRE_TIMEOUT_MS", default_value_t = 10_000)]
    pub acquire_timeout_ms: u64,

    /// Close connections unused for longer than this
    #[arg(long, env = "APNS_MAX_IDLE_SECS", default_value_t = 300)]
    pub max_idle_secs: u64,

    /// How often to look for idle connections
    #[arg(long, env = "APNS_REAP_INTERVAL_SECS", default_value_t = 60)]
    pub reap_interval_secs: u64,
}

impl PoolConfig {
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub const fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

#[derive(Clone, Debug, Args)]
pub struct DeliveryConfig {
    /// Maximum time for a single delivery round
    #[arg(long, env = "APNS_SEND_TIMEOUT_MS", default_value_t = 10_000)]
    pub send_timeout_ms: u64,

    /// Comma-separated gateway status codes treated as transient
    #[arg(
        long,
        env = "APNS_TRANSIENT_CODES",
        value_delimiter = ',',
        default_values_t = DEFAULT_TRANSIENT_CODES
    )]
    pub transient_codes: Vec<u8>,
}

impl DeliveryConfig {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::new(self.transient_codes.clone())
    }
}

#[derive(Clone, Debug, Args)]
pub struct FeedbackConfig {
    /// How often to reconcile against the feedback service (0 disables)
    #[arg(long = "feedback-interval-secs", env = "APNS_FEEDBACK_INTERVAL_SECS", default_value_t = 3600)]
    pub interval_secs: u64,

    /// Maximum time to wait for each feedback read
    #[arg(long = "feedback-timeout-ms", env = "APNS_FEEDBACK_TIMEOUT_MS", default_value_t = 30_000)]
    pub timeout_ms: u64,
}

impl FeedbackConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "APNS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint for traces and metrics
    #[arg(long, env = "APNS_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
