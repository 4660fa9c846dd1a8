use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Owner account baked into the original deployment.
pub const DEFAULT_OWNER_ID: u64 = 1_156_569_457_125_244_949;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Runtime configuration (`config.toml`). Chat-mutable settings live in the
/// JSON documents managed by [`crate::config::ConfigStore`] instead.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Discord bot token. Falls back to `token.txt` next to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// User ID with owner-only access (`!shutdown`) and a staff bypass.
    #[serde(default = "default_owner_id")]
    pub owner_id: u64,

    /// Channel receiving audit cards. Falls back to `channel_id.txt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel_id: Option<u64>,

    /// Restrict the bot to one guild. Events from other guilds are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<u64>,

    /// Directory holding `config.json` and `welcome_config.json`.
    /// Defaults to the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

fn default_owner_id() -> u64 {
    DEFAULT_OWNER_ID
}

// ── Liveness probe ───────────────────────────────────────────────

/// Self-ping probe (`[liveness]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LivenessConfig {
    /// URL fetched on every tick. Falls back to `site.txt`. Default: `http://localhost:8080`.
    #[serde(default = "default_liveness_url")]
    pub url: String,
    /// Seconds between ticks. Default: `60`.
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
    /// Per-request timeout. Default: `10`.
    #[serde(default = "default_liveness_timeout")]
    pub timeout_secs: u64,
}

fn default_liveness_url() -> String {
    "http://localhost:8080".into()
}

fn default_liveness_interval() -> u64 {
    60
}

fn default_liveness_timeout() -> u64 {
    10
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            url: default_liveness_url(),
            interval_secs: default_liveness_interval(),
            timeout_secs: default_liveness_timeout(),
        }
    }
}

// ── Keep-alive gateway ───────────────────────────────────────────

/// Keep-alive HTTP responder (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Bind host. Default: `0.0.0.0`.
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Bind port. Default: `8080`.
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_gateway_port() -> u16 {
    8080
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────

/// How a restart is carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Exit with [`crate::lifecycle::RESTART_EXIT_CODE`] and let the service
    /// manager relaunch the process.
    #[default]
    Supervisor,
    /// Replace the process image in place.
    Reexec,
}

/// Restart behaviour (`[lifecycle]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub restart_mode: RestartMode,
    /// Seconds a graceful shutdown may take before falling back to re-exec. Default: `15`.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_shutdown_grace() -> u64 {
    15
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_mode: RestartMode::default(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(CONFIG_FILE_NAME),
            bot_token: None,
            owner_id: DEFAULT_OWNER_ID,
            log_channel_id: None,
            guild_id: None,
            data_dir: None,
            liveness: LivenessConfig::default(),
            gateway: GatewayConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CODEWARDEN_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".codewarden"))
}

/// Read a single-value legacy file (`token.txt`, `channel_id.txt`, `site.txt`).
fn read_legacy_value(dir: &Path, name: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Resolve the config directory, read `config.toml` (writing a default one
    /// on first run), then layer legacy files and env overrides on top.
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = default_config_dir()?;
        Self::load_or_init_in(&config_dir).await
    }

    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(config_dir)
            .await
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let contents = tokio::fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config
        } else {
            let config = Config {
                config_path,
                ..Config::default()
            };
            config.save()?;
            tracing::info!("Wrote default config to {}", config.config_path.display());
            config
        };

        config.apply_legacy_files();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        crate::config::store::atomic_write(&self.config_path, toml_str.as_bytes())
            .context("Failed to write config file")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
    }

    /// Directory for the JSON documents.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| self.config_dir())
    }

    /// Fill unset values from the single-value files the first deployment used.
    pub fn apply_legacy_files(&mut self) {
        let dir = self.config_dir();
        if self.bot_token.is_none() {
            self.bot_token = read_legacy_value(&dir, "token.txt");
        }
        if self.log_channel_id.is_none() {
            self.log_channel_id =
                read_legacy_value(&dir, "channel_id.txt").and_then(|v| v.parse().ok());
        }
        if self.liveness.url == default_liveness_url() {
            if let Some(url) = read_legacy_value(&dir, "site.txt") {
                self.liveness.url = url;
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("CODEWARDEN_BOT_TOKEN") {
            if !token.is_empty() {
                self.bot_token = Some(token);
            }
        }

        if let Ok(owner) = std::env::var("CODEWARDEN_OWNER_ID") {
            match owner.trim().parse() {
                Ok(id) => self.owner_id = id,
                Err(_) => tracing::warn!("Ignoring invalid CODEWARDEN_OWNER_ID: {owner}"),
            }
        }

        if let Ok(channel) = std::env::var("CODEWARDEN_LOG_CHANNEL_ID") {
            match channel.trim().parse() {
                Ok(id) => self.log_channel_id = Some(id),
                Err(_) => tracing::warn!("Ignoring invalid CODEWARDEN_LOG_CHANNEL_ID: {channel}"),
            }
        }

        if let Ok(url) = std::env::var("CODEWARDEN_LIVENESS_URL") {
            if !url.is_empty() {
                self.liveness.url = url;
            }
        }

        if let Ok(port) = std::env::var("CODEWARDEN_PORT").or_else(|_| std::env::var("PORT")) {
            if let Ok(port) = port.trim().parse::<u16>() {
                self.gateway.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.liveness.interval_secs == 0 {
            anyhow::bail!("liveness.interval_secs must be greater than 0");
        }
        if self.liveness.timeout_secs == 0 {
            anyhow::bail!("liveness.timeout_secs must be greater than 0");
        }
        if self.liveness.url.trim().is_empty() {
            anyhow::bail!("liveness.url must not be empty");
        }
        Ok(())
    }

    /// The bot token, or a startup error naming every place it is read from.
    pub fn require_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .with_context(|| {
                format!(
                    "❌ No bot token found. Set bot_token in {}, CODEWARDEN_BOT_TOKEN, or token.txt",
                    self.config_path.display()
                )
            })
    }
}
