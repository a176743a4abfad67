use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RECIPIENT_DELAY_MS: u64 = 500;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 2_000;
/// Rows fetched per resolver query; paging continues until a short page.
pub const DEFAULT_PAGE_SIZE: usize = 200;
pub const DEFAULT_TRANSPORT_TIMEOUT_MS: u64 = 10_000;

/// Top-level config (pressroom.toml + PRESSROOM_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressroomConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks (default: 60).
    /// Override with env var: PRESSROOM_SCHEDULER__POLL_INTERVAL_SECS=30
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio::time::interval panic.
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// Pacing of outbound notification delivery.
///
/// The provider throttles bulk senders, so recipients go out in fixed-size
/// batches: `recipient_delay_ms` between recipients of one batch and
/// `batch_delay_ms` between batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_recipient_delay_ms")]
    pub recipient_delay_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl DispatchConfig {
    /// Batch size clamped to at least one recipient.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            tracing::warn!("dispatch.batch_size = 0 is invalid; using 1");
            return 1;
        }
        self.batch_size
    }

    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }

    pub fn recipient_delay(&self) -> Duration {
        Duration::from_millis(self.recipient_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            recipient_delay_ms: DEFAULT_RECIPIENT_DELAY_MS,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Which delivery transport the daemon wires up.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Log every delivery instead of sending it (development / dry run).
    #[default]
    Log,
    /// POST each message to a bulk-mail provider's HTTP API.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// Provider send endpoint. Required when `kind = "http"`.
    pub endpoint: Option<String>,
    /// Sent as `Authorization: Bearer <api_key>` when set.
    pub api_key: Option<String>,
    /// When set, the JSON body is signed with HMAC-SHA256 and the signature
    /// sent as `X-Pressroom-Signature: sha256=<hex>`.
    pub signing_secret: Option<String>,
    /// `from` address placed on every message.
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_transport_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Log,
            endpoint: None,
            api_key: None,
            signing_secret: None,
            sender: default_sender(),
            timeout_ms: DEFAULT_TRANSPORT_TIMEOUT_MS,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_recipient_delay_ms() -> u64 {
    DEFAULT_RECIPIENT_DELAY_MS
}
fn default_batch_delay_ms() -> u64 {
    DEFAULT_BATCH_DELAY_MS
}
fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}
fn default_transport_timeout_ms() -> u64 {
    DEFAULT_TRANSPORT_TIMEOUT_MS
}
fn default_sender() -> String {
    "newsletter@localhost".to_string()
}
fn default_db_path() -> String {
    format!("{}/pressroom.db", pressroom_home())
}

fn pressroom_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pressroom", home)
}

impl PressroomConfig {
    /// Load config from a TOML file with PRESSROOM_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `PRESSROOM_DISPATCH__BATCH_SIZE=25`. A missing file is not an error:
    /// every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PressroomConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PRESSROOM_").split("__"))
            .extract()
            .map_err(|e| crate::error::PressroomError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    format!("{}/pressroom.toml", pressroom_home())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PressroomConfig::default();
        assert_eq!(cfg.scheduler.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.dispatch.batch_size, 10);
        assert_eq!(cfg.dispatch.recipient_delay(), Duration::from_millis(500));
        assert_eq!(cfg.dispatch.batch_delay(), Duration::from_millis(2000));
        assert_eq!(cfg.transport.kind, TransportKind::Log);
    }

    #[test]
    fn load_reads_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[dispatch]\nbatch_size = 25\nbatch_delay_ms = 5000\n\n[transport]\nkind = \"http\"\nendpoint = \"https://mail.example.com/send\""
        )
        .unwrap();

        let cfg = PressroomConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.dispatch.batch_size, 25);
        assert_eq!(cfg.dispatch.batch_delay_ms, 5000);
        // untouched keys keep their defaults
        assert_eq!(cfg.dispatch.recipient_delay_ms, DEFAULT_RECIPIENT_DELAY_MS);
        assert_eq!(cfg.scheduler.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(cfg.transport.kind, TransportKind::Http);
        assert_eq!(
            cfg.transport.endpoint.as_deref(),
            Some("https://mail.example.com/send")
        );
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cfg = PressroomConfig::load(path.to_str()).unwrap();
        assert_eq!(cfg.dispatch.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn load_rejects_wrong_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nbatch_size = \"lots\"").unwrap();
        let err = PressroomConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let cfg = DispatchConfig {
            batch_size: 0,
            ..DispatchConfig::default()
        };
        assert_eq!(cfg.effective_batch_size(), 1);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let cfg = SchedulerConfig {
            poll_interval_secs: 0,
        };
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }
}
