//! Application configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use fill_core::LAMPORTS_PER_SOL;
use fill_discovery::{DepositScanConfig, DiscoveryConfig, ListenerConfig};
use fill_executor::{ExecutorConfig, KeySource, SchedulerConfig, TransactionConfig};
use fill_ledger::{FeedConfig, RetryPolicy};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::{AppError, AppResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "FILL_BOT_CONFIG";

/// Config file used when neither the CLI nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Ledger endpoints and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Vault program id (base58).
    #[serde(default)]
    pub program_id: String,
    /// Expected slot duration (ms).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8900".to_string()
}

fn default_tick_ms() -> u64 {
    400
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            ws_url: default_ws_url(),
            program_id: String::new(),
            tick_ms: default_tick_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Indexed order API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSection {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_indexer_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_indexer_timeout_ms() -> u64 {
    10_000
}

impl Default for IndexerSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: default_indexer_timeout_ms(),
        }
    }
}

/// Operator keypair location. A file path takes precedence over the
/// environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSection {
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
    #[serde(default = "default_keypair_env")]
    pub keypair_env: String,
    /// If set, the loaded keypair must have this address.
    #[serde(default)]
    pub expected_address: Option<String>,
}

fn default_keypair_env() -> String {
    "FILL_BOT_KEYPAIR".to_string()
}

impl Default for WalletSection {
    fn default() -> Self {
        Self {
            keypair_path: None,
            keypair_env: default_keypair_env(),
            expected_address: None,
        }
    }
}

impl WalletSection {
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        match &self.keypair_path {
            Some(path) => KeySource::File { path: path.clone() },
            None => KeySource::EnvVar {
                var_name: self.keypair_env.clone(),
            },
        }
    }

    pub fn expected_address(&self) -> AppResult<Option<Pubkey>> {
        self.expected_address
            .as_deref()
            .map(|address| parse_pubkey("wallet.expected_address", address))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Maximum random delay added to unlock waits (ms).
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_execute_retries")]
    pub execute_retries: u32,
    /// How long executed and gone orders stay de-duplicated (s).
    #[serde(default = "default_settled_ttl_secs")]
    pub settled_ttl_secs: u64,
}

fn default_max_jitter_ms() -> u64 {
    10_000
}

fn default_execute_retries() -> u32 {
    3
}

fn default_settled_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_jitter_ms: default_max_jitter_ms(),
            execute_retries: default_execute_retries(),
            settled_ttl_secs: default_settled_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Minimum share of a withdrawal the vault must currently allow.
    #[serde(default = "default_safety_ratio")]
    pub safety_ratio: Decimal,
    #[serde(default = "default_compute_unit_multiplier")]
    pub compute_unit_multiplier: Decimal,
    #[serde(default = "default_min_compute_units")]
    pub min_compute_units: u32,
    #[serde(default = "default_priority_fee_percentile")]
    pub priority_fee_percentile: u8,
    /// Micro-lamports per compute unit.
    #[serde(default = "default_min_priority_fee")]
    pub min_priority_fee: u64,
    #[serde(default = "default_fee_ceiling_lamports")]
    pub fee_ceiling_lamports: u64,
    #[serde(default = "default_cycle_retries")]
    pub cycle_retries: u32,
    #[serde(default)]
    pub send_retries: u32,
    #[serde(default = "default_confirm_retries")]
    pub confirm_retries: u32,
}

fn default_safety_ratio() -> Decimal {
    Decimal::new(85, 2)
}

fn default_compute_unit_multiplier() -> Decimal {
    Decimal::new(15, 1)
}

fn default_min_compute_units() -> u32 {
    200_000
}

fn default_priority_fee_percentile() -> u8 {
    75
}

fn default_min_priority_fee() -> u64 {
    1_000
}

fn default_fee_ceiling_lamports() -> u64 {
    5_000_000
}

fn default_cycle_retries() -> u32 {
    3
}

fn default_confirm_retries() -> u32 {
    1
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            safety_ratio: default_safety_ratio(),
            compute_unit_multiplier: default_compute_unit_multiplier(),
            min_compute_units: default_min_compute_units(),
            priority_fee_percentile: default_priority_fee_percentile(),
            min_priority_fee: default_min_priority_fee(),
            fee_ceiling_lamports: default_fee_ceiling_lamports(),
            cycle_retries: default_cycle_retries(),
            send_retries: 0,
            confirm_retries: default_confirm_retries(),
        }
    }
}

impl From<&ExecutorSection> for ExecutorConfig {
    fn from(cfg: &ExecutorSection) -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            safety_ratio: cfg.safety_ratio,
            transaction: TransactionConfig {
                compute_unit_multiplier: cfg.compute_unit_multiplier,
                min_compute_units: cfg.min_compute_units,
                priority_fee_percentile: cfg.priority_fee_percentile,
                min_priority_fee: cfg.min_priority_fee,
                fee_ceiling_lamports: cfg.fee_ceiling_lamports,
            },
            cycle_retry: defaults.cycle_retry.with_max_retries(cfg.cycle_retries),
            send_retry: defaults.send_retry.with_max_retries(cfg.send_retries),
            confirm_retry: defaults.confirm_retry.with_max_retries(cfg.confirm_retries),
            query_retry: defaults.query_retry,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_pass_interval_secs")]
    pub interval_secs: u64,
    /// Slots after release before an order counts as missed.
    #[serde(default = "default_missed_threshold_slots")]
    pub missed_threshold_slots: u64,
    #[serde(default = "default_ledger_retries")]
    pub ledger_retries: u32,
    #[serde(default = "default_pass_interval_secs")]
    pub deposit_interval_secs: u64,
    #[serde(default = "default_deposit_retries")]
    pub deposit_retries: u32,
}

fn default_pass_interval_secs() -> u64 {
    180
}

fn default_missed_threshold_slots() -> u64 {
    150
}

fn default_ledger_retries() -> u32 {
    10
}

fn default_deposit_retries() -> u32 {
    3
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            interval_secs: default_pass_interval_secs(),
            missed_threshold_slots: default_missed_threshold_slots(),
            ledger_retries: default_ledger_retries(),
            deposit_interval_secs: default_pass_interval_secs(),
            deposit_retries: default_deposit_retries(),
        }
    }
}

impl From<&DiscoverySection> for DiscoveryConfig {
    fn from(cfg: &DiscoverySection) -> Self {
        let defaults = DiscoveryConfig::default();
        Self {
            interval: Duration::from_secs(cfg.interval_secs),
            missed_threshold_slots: cfg.missed_threshold_slots,
            ledger_retry: defaults.ledger_retry.with_max_retries(cfg.ledger_retries),
            slot_retry: defaults.slot_retry,
        }
    }
}

impl From<&DiscoverySection> for DepositScanConfig {
    fn from(cfg: &DiscoverySection) -> Self {
        Self {
            interval: Duration::from_secs(cfg.deposit_interval_secs),
            ledger_retry: RetryPolicy::default().with_max_retries(cfg.deposit_retries),
        }
    }
}

/// Transaction subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSection {
    #[serde(default = "default_ledger_retries")]
    pub parse_retries: u32,
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            parse_retries: default_ledger_retries(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

/// Operator balance floor and heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSection {
    #[serde(default = "default_min_balance_sol")]
    pub min_balance_sol: Decimal,
    #[serde(default = "default_heartbeat_log_secs")]
    pub heartbeat_log_secs: u64,
}

fn default_min_balance_sol() -> Decimal {
    Decimal::new(3, 1)
}

fn default_heartbeat_log_secs() -> u64 {
    24 * 60 * 60
}

impl Default for BalanceSection {
    fn default() -> Self {
        Self {
            min_balance_sol: default_min_balance_sol(),
            heartbeat_log_secs: default_heartbeat_log_secs(),
        }
    }
}

impl BalanceSection {
    /// Floor in lamports.
    pub fn min_balance_lamports(&self) -> AppResult<u64> {
        (self.min_balance_sol * Decimal::from(LAMPORTS_PER_SOL))
            .trunc()
            .to_u64()
            .ok_or_else(|| {
                AppError::Config(format!(
                    "balance.min_balance_sol out of range: {}",
                    self.min_balance_sol
                ))
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default)]
    pub log_filter: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub indexer: IndexerSection,
    #[serde(default)]
    pub wallet: WalletSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub listener: ListenerSection,
    #[serde(default)]
    pub balance: BalanceSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Config path: CLI argument, then environment, then the default.
#[must_use]
pub fn resolve_config_path(cli: Option<String>, env: Option<String>) -> String {
    cli.or(env)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

fn parse_pubkey(field: &str, value: &str) -> AppResult<Pubkey> {
    Pubkey::from_str(value.trim())
        .map_err(|e| AppError::Config(format!("{field} is not a valid address ({value}): {e}")))
}

impl AppConfig {
    /// Load from the resolved path.
    pub fn load(cli_path: Option<String>) -> AppResult<Self> {
        let path = resolve_config_path(cli_path, std::env::var(CONFIG_ENV_VAR).ok());
        Self::from_file(&path)
    }

    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.ledger.rpc_url.trim().is_empty() {
            return Err(AppError::Config("ledger.rpc_url is empty".to_string()));
        }
        if self.ledger.tick_ms == 0 {
            return Err(AppError::Config("ledger.tick_ms must be positive".to_string()));
        }
        if self.executor.safety_ratio <= Decimal::ZERO || self.executor.safety_ratio > Decimal::ONE {
            return Err(AppError::Config(format!(
                "executor.safety_ratio must be in (0, 1], got {}",
                self.executor.safety_ratio
            )));
        }
        if self.executor.compute_unit_multiplier < Decimal::ONE {
            return Err(AppError::Config(format!(
                "executor.compute_unit_multiplier must be at least 1, got {}",
                self.executor.compute_unit_multiplier
            )));
        }
        if self.executor.priority_fee_percentile > 100 {
            return Err(AppError::Config(format!(
                "executor.priority_fee_percentile must be at most 100, got {}",
                self.executor.priority_fee_percentile
            )));
        }
        self.balance.min_balance_lamports()?;
        self.wallet.expected_address()?;
        Ok(())
    }

    /// Vault program id.
    pub fn program_id(&self) -> AppResult<Pubkey> {
        if self.ledger.program_id.trim().is_empty() {
            return Err(AppError::Config("ledger.program_id is not set".to_string()));
        }
        parse_pubkey("ledger.program_id", &self.ledger.program_id)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.request_timeout_ms)
    }

    #[must_use]
    pub fn indexer_timeout(&self) -> Duration {
        Duration::from_millis(self.indexer.timeout_ms)
    }

    #[must_use]
    pub fn heartbeat_log_interval(&self) -> Duration {
        Duration::from_secs(self.balance.heartbeat_log_secs)
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            tick: Duration::from_millis(self.ledger.tick_ms),
            max_jitter: Duration::from_millis(self.scheduler.max_jitter_ms),
            execute_retry: defaults
                .execute_retry
                .with_max_retries(self.scheduler.execute_retries),
            slot_retry: defaults.slot_retry,
            settled_ttl: Duration::from_secs(self.scheduler.settled_ttl_secs),
        }
    }

    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::from(&self.executor)
    }

    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig::from(&self.discovery)
    }

    #[must_use]
    pub fn deposit_scan_config(&self) -> DepositScanConfig {
        DepositScanConfig::from(&self.discovery)
    }

    #[must_use]
    pub fn listener_config(&self, program_id: Pubkey) -> ListenerConfig {
        let mut config = ListenerConfig::new(program_id);
        config.parse_retry = config.parse_retry.with_max_retries(self.listener.parse_retries);
        config
    }

    #[must_use]
    pub fn feed_config(&self, program_id: Pubkey) -> FeedConfig {
        let mut config = FeedConfig::new(self.ledger.ws_url.clone(), program_id);
        config.max_reconnect_attempts = self.listener.max_reconnect_attempts;
        config.reconnect_base_delay_ms = self.listener.reconnect_base_delay_ms;
        config.reconnect_max_delay_ms = self.listener.reconnect_max_delay_ms;
        config.heartbeat_interval_ms = self.listener.heartbeat_interval_ms;
        config
    }
}
