use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `dropwatch.toml`, overridable by the
/// environment variables applied in `main.rs`/`bin/scheduler.rs`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DropwatchConfig {
    #[serde(default)]
    pub data_root: DataRootConfig,
    #[serde(default)]
    pub czds: CzdsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataRootConfig {
    #[serde(default = "default_data_root")]
    pub path: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for DataRootConfig {
    fn default() -> Self {
        Self {
            path: default_data_root(),
            db_path: default_db_path(),
        }
    }
}

fn default_data_root() -> String {
    "./data/zones".to_string()
}

fn default_db_path() -> String {
    "./dropwatch.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CzdsConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub byte_inactivity_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CzdsConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            base_url: default_base_url(),
            username: String::new(),
            password: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            byte_inactivity_timeout_secs: default_inactivity_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_auth_url() -> String {
    "https://account-api.icann.org/api/authenticate".to_string()
}

fn default_base_url() -> String {
    "https://czds-api.icann.org".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_inactivity_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_catchup_horizon")]
    pub catchup_horizon_days: u32,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_job_max_retries")]
    pub job_max_retries: u32,
    #[serde(default = "default_job_backoff_base_secs")]
    pub job_backoff_base_secs: u64,
    #[serde(default = "default_job_backoff_cap_secs")]
    pub job_backoff_cap_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            catchup_horizon_days: default_catchup_horizon(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            job_max_retries: default_job_max_retries(),
            job_backoff_base_secs: default_job_backoff_base_secs(),
            job_backoff_cap_secs: default_job_backoff_cap_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_catchup_horizon() -> u32 {
    7
}

fn default_cycle_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_job_max_retries() -> u32 {
    5
}

fn default_job_backoff_base_secs() -> u64 {
    30
}

fn default_job_backoff_cap_secs() -> u64 {
    60 * 60
}

impl DropwatchConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: DropwatchConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides, matching the env-var surface
    /// named in spec §6.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DROPWATCH_DATA_ROOT") {
            self.data_root.path = v;
        }
        if let Ok(v) = std::env::var("DROPWATCH_DB_PATH") {
            self.data_root.db_path = v;
        }
        if let Ok(v) = std::env::var("CZDS_USERNAME") {
            self.czds.username = v;
        }
        if let Ok(v) = std::env::var("CZDS_PASSWORD") {
            self.czds.password = v;
        }
        if let Ok(v) = std::env::var("CZDS_BASE_URL") {
            self.czds.base_url = v;
        }
        if let Ok(v) = std::env::var("DROPWATCH_WORKERS") {
            if let Ok(n) = v.parse() {
                self.scheduler.workers = n;
            }
        }
        if let Ok(v) = std::env::var("DROPWATCH_CATCHUP_HORIZON") {
            if let Ok(n) = v.parse() {
                self.scheduler.catchup_horizon_days = n;
            }
        }
        self
    }
}
