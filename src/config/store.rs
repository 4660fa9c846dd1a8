//! JSON-backed documents mutated from chat: the operational config and the
//! welcome/goodbye config.
//!
//! Both documents are loaded once at startup and written through
//! [`ConfigStore`], which applies a mutation to a copy, persists the copy and
//! only then commits it in memory. A failed write therefore never leaves the
//! in-memory state ahead of disk.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const OPERATIONAL_FILE: &str = "config.json";
pub const WELCOME_FILE: &str = "welcome_config.json";

/// Bounds for the auto-restart interval, in seconds (5 to 720 minutes).
pub const MIN_RESTART_INTERVAL_SECS: u64 = 300;
pub const MAX_RESTART_INTERVAL_SECS: u64 = 43_200;
/// Longest delay `!shutdown` accepts: one week.
pub const MAX_SHUTDOWN_MINUTES: u64 = 10_080;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Documents ────────────────────────────────────────────────────

/// Operational settings (`config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationalConfig {
    /// Auto-restart interval in seconds. Always within
    /// [`MIN_RESTART_INTERVAL_SECS`, `MAX_RESTART_INTERVAL_SECS`].
    pub restart_interval: u64,
    /// Role names granted staff access. Ordered, no duplicates.
    pub allowed_roles: Vec<String>,
    /// Delay used by `!shutdown` when no minute count is given. At most
    /// [`MAX_SHUTDOWN_MINUTES`].
    pub shutdown_default_minutes: u64,
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self {
            restart_interval: 1800,
            allowed_roles: vec!["Staff".into(), "Admin".into(), "Moderator".into()],
            shutdown_default_minutes: 5,
        }
    }
}

impl OperationalConfig {
    pub fn restart_interval_minutes(&self) -> u64 {
        self.restart_interval / 60
    }

    /// Add a role name. Returns `false` (and changes nothing) if it is already
    /// present; matching is exact and case-sensitive.
    pub fn add_role(&mut self, name: &str) -> bool {
        if self.allowed_roles.iter().any(|r| r == name) {
            return false;
        }
        self.allowed_roles.push(name.to_string());
        true
    }

    /// Remove a role name. Returns `false` if it was not allow-listed.
    pub fn remove_role(&mut self, name: &str) -> bool {
        let before = self.allowed_roles.len();
        self.allowed_roles.retain(|r| r != name);
        self.allowed_roles.len() != before
    }

    /// Repair a document read from disk so the invariants hold.
    fn normalize(&mut self) {
        let clamped = self
            .restart_interval
            .clamp(MIN_RESTART_INTERVAL_SECS, MAX_RESTART_INTERVAL_SECS);
        if clamped != self.restart_interval {
            tracing::warn!(
                "restart_interval {} out of range; clamped to {clamped}",
                self.restart_interval
            );
            self.restart_interval = clamped;
        }

        if self.shutdown_default_minutes > MAX_SHUTDOWN_MINUTES {
            tracing::warn!(
                "shutdown_default_minutes {} out of range; clamped to {MAX_SHUTDOWN_MINUTES}",
                self.shutdown_default_minutes
            );
            self.shutdown_default_minutes = MAX_SHUTDOWN_MINUTES;
        }

        let mut seen = Vec::with_capacity(self.allowed_roles.len());
        for role in self.allowed_roles.drain(..) {
            if !seen.contains(&role) {
                seen.push(role);
            }
        }
        self.allowed_roles = seen;
    }
}

/// Welcome/goodbye settings (`welcome_config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WelcomeConfig {
    pub welcome_enabled: bool,
    pub goodbye_enabled: bool,
    pub welcome_channel_id: Option<u64>,
    pub welcome_message: String,
    pub goodbye_message: String,
}

impl Default for WelcomeConfig {
    fn default() -> Self {
        Self {
            welcome_enabled: true,
            goodbye_enabled: true,
            welcome_channel_id: None,
            welcome_message: "🎉 Welcome {user} to {guild}!".into(),
            goodbye_message: "👋 Goodbye {user}, we’ll miss you in {guild}!".into(),
        }
    }
}

impl WelcomeConfig {
    /// Flip welcome and goodbye together. Both flags end up equal, derived
    /// from the current welcome flag.
    pub fn toggle(&mut self) -> bool {
        let next = !self.welcome_enabled;
        self.welcome_enabled = next;
        self.goodbye_enabled = next;
        next
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Substitute `{user}` and `{guild}` in a stored template.
///
/// Single pass: substituted values are never re-scanned, and any other brace
/// sequence is copied through literally.
pub fn render_template(template: &str, user: &str, guild: &str) -> String {
    let mut out = String::with_capacity(template.len() + user.len() + guild.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{user}") {
            out.push_str(user);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{guild}") {
            out.push_str(guild);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

// ── Load / save contract ─────────────────────────────────────────

/// Load a JSON document, writing and returning `default` when the file is
/// missing or cannot be parsed.
pub fn load_document<T>(path: &Path, default: &T) -> T
where
    T: DeserializeOwned + Serialize + Clone,
{
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<T>(&contents) {
            Ok(doc) => return doc,
            Err(e) => {
                tracing::warn!("{} is corrupt ({e}); rewriting defaults", path.display());
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("{} not found; writing defaults", path.display());
        }
        Err(e) => {
            tracing::warn!("failed to read {} ({e}); rewriting defaults", path.display());
        }
    }

    if let Err(e) = save_document(path, default) {
        tracing::error!("failed to write default document: {e}");
    }
    default.clone()
}

/// Atomically replace `path` with the pretty JSON form of `doc`.
pub fn save_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(doc)?;
    atomic_write(path, &json)
}

/// Write to a sibling temp file, fsync it, then rename over the target.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err)?;

    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or("document.json");
    let temp_path = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

    let write_temp = || -> std::io::Result<()> {
        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        temp_file.write_all(bytes)?;
        temp_file.sync_all()
    };

    if let Err(e) = write_temp().and_then(|()| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(e));
    }
    Ok(())
}

// ── ConfigStore ──────────────────────────────────────────────────

/// Owner of both chat-mutable documents. Passed by `Arc` to every component
/// that reads or mutates them.
pub struct ConfigStore {
    operational_path: PathBuf,
    welcome_path: PathBuf,
    operational: Mutex<OperationalConfig>,
    welcome: Mutex<WelcomeConfig>,
}

impl ConfigStore {
    /// Load (or initialize) both documents under `data_dir`.
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            anyhow::anyhow!("failed to create data dir {}: {e}", data_dir.display())
        })?;

        let operational_path = data_dir.join(OPERATIONAL_FILE);
        let welcome_path = data_dir.join(WELCOME_FILE);

        let mut operational = load_document(&operational_path, &OperationalConfig::default());
        operational.normalize();
        let welcome = load_document(&welcome_path, &WelcomeConfig::default());

        Ok(Self {
            operational_path,
            welcome_path,
            operational: Mutex::new(operational),
            welcome: Mutex::new(welcome),
        })
    }

    pub fn operational(&self) -> OperationalConfig {
        self.operational.lock().clone()
    }

    pub fn welcome(&self) -> WelcomeConfig {
        self.welcome.lock().clone()
    }

    /// Apply `mutate` and persist. Nothing is written (or committed) when the
    /// mutation leaves the document unchanged.
    pub fn update_operational<T>(
        &self,
        mutate: impl FnOnce(&mut OperationalConfig) -> T,
    ) -> Result<T, StoreError> {
        update_and_persist(&self.operational, &self.operational_path, mutate)
    }

    pub fn update_welcome<T>(
        &self,
        mutate: impl FnOnce(&mut WelcomeConfig) -> T,
    ) -> Result<T, StoreError> {
        update_and_persist(&self.welcome, &self.welcome_path, mutate)
    }
}

fn update_and_persist<D, T>(
    slot: &Mutex<D>,
    path: &Path,
    mutate: impl FnOnce(&mut D) -> T,
) -> Result<T, StoreError>
where
    D: Clone + PartialEq + Serialize,
{
    let mut guard = slot.lock();
    let mut next = guard.clone();
    let out = mutate(&mut next);
    if next == *guard {
        return Ok(out);
    }

    if let Err(e) = save_document(path, &next) {
        tracing::error!("persistence failure for {}: {e}", path.display());
        return Err(e);
    }
    *guard = next;
    Ok(out)
}
