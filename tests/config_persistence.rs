//! Config file and JSON document persistence against real temp directories.

use codewarden::config::{
    Config, ConfigStore, OperationalConfig, WelcomeConfig, MAX_RESTART_INTERVAL_SECS,
    MIN_RESTART_INTERVAL_SECS,
};
use std::fs;
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────────────────
// ConfigStore documents
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fresh_directory_gets_default_documents() {
    let tmp = TempDir::new().unwrap();
    let store = ConfigStore::open(tmp.path()).unwrap();

    assert_eq!(store.operational(), OperationalConfig::default());
    assert_eq!(store.welcome(), WelcomeConfig::default());
    assert!(tmp.path().join("config.json").exists());
    assert!(tmp.path().join("welcome_config.json").exists());
}

#[test]
fn mutations_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let store = ConfigStore::open(tmp.path()).unwrap();
        store
            .update_operational(|cfg| {
                cfg.restart_interval = 3600;
                cfg.add_role("Helpers");
                cfg.shutdown_default_minutes = 12;
            })
            .unwrap();
        store
            .update_welcome(|cfg| {
                cfg.welcome_channel_id = Some(77);
                cfg.goodbye_message = "bye {user}".into();
            })
            .unwrap();
    }

    let store = ConfigStore::open(tmp.path()).unwrap();
    let operational = store.operational();
    assert_eq!(operational.restart_interval, 3600);
    assert_eq!(
        operational.allowed_roles,
        vec!["Staff", "Admin", "Moderator", "Helpers"]
    );
    assert_eq!(operational.shutdown_default_minutes, 12);
    let welcome = store.welcome();
    assert_eq!(welcome.welcome_channel_id, Some(77));
    assert_eq!(welcome.goodbye_message, "bye {user}");
}

#[test]
fn corrupt_document_falls_back_to_defaults_and_is_rewritten() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.json"), "{ not json").unwrap();
    fs::write(
        tmp.path().join("welcome_config.json"),
        r#"{"welcome_enabled": false}"#,
    )
    .unwrap();

    let store = ConfigStore::open(tmp.path()).unwrap();
    assert_eq!(store.operational(), OperationalConfig::default());
    // Missing keys take their defaults.
    let welcome = store.welcome();
    assert!(!welcome.welcome_enabled);
    assert!(welcome.goodbye_enabled);

    let rewritten = fs::read_to_string(tmp.path().join("config.json")).unwrap();
    let parsed: OperationalConfig = serde_json::from_str(&rewritten).unwrap();
    assert_eq!(parsed, OperationalConfig::default());
}

#[test]
fn out_of_range_interval_on_disk_is_clamped() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.json"),
        r#"{"restart_interval": 10, "allowed_roles": ["Staff", "Staff"], "shutdown_default_minutes": 1}"#,
    )
    .unwrap();
    let store = ConfigStore::open(tmp.path()).unwrap();
    assert_eq!(store.operational().restart_interval, MIN_RESTART_INTERVAL_SECS);
    assert_eq!(store.operational().allowed_roles, vec!["Staff"]);

    fs::write(
        tmp.path().join("config.json"),
        r#"{"restart_interval": 999999}"#,
    )
    .unwrap();
    let store = ConfigStore::open(tmp.path()).unwrap();
    assert_eq!(store.operational().restart_interval, MAX_RESTART_INTERVAL_SECS);
}

#[test]
fn failed_write_leaves_memory_untouched() {
    let tmp = TempDir::new().unwrap();
    // A directory where the document should be makes every write fail.
    fs::create_dir(tmp.path().join("config.json")).unwrap();

    let store = ConfigStore::open(tmp.path()).unwrap();
    let result = store.update_operational(|cfg| cfg.add_role("Helpers"));

    assert!(result.is_err());
    assert_eq!(store.operational(), OperationalConfig::default());
}

#[test]
fn no_temp_files_are_left_behind() {
    let tmp = TempDir::new().unwrap();
    let store = ConfigStore::open(tmp.path()).unwrap();
    for minutes in [10, 20, 30] {
        store
            .update_operational(|cfg| cfg.restart_interval = minutes * 60)
            .unwrap();
    }

    let mut names: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["config.json", "welcome_config.json"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// config.toml
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_run_writes_default_config_toml() {
    let tmp = TempDir::new().unwrap();
    let config = Config::load_or_init_in(tmp.path()).await.unwrap();

    assert!(tmp.path().join("config.toml").exists());
    assert_eq!(config.config_dir(), tmp.path());
    assert_eq!(config.data_dir(), tmp.path());

    let again = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(again.owner_id, config.owner_id);
    assert_eq!(again.gateway.port, config.gateway.port);
}

#[tokio::test]
async fn explicit_values_are_read_back() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        r#"
owner_id = 42
log_channel_id = 900
bot_token = "abc"

[liveness]
url = "https://warden.example.test"
"#,
    )
    .unwrap();

    let config = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(config.owner_id, 42);
    assert_eq!(config.log_channel_id, Some(900));
    assert_eq!(config.liveness.url, "https://warden.example.test");
}

#[tokio::test]
async fn legacy_single_value_files_fill_gaps() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "owner_id = 7\n").unwrap();
    fs::write(tmp.path().join("channel_id.txt"), " 555 \n").unwrap();
    fs::write(tmp.path().join("site.txt"), "https://legacy.example.test\n").unwrap();

    let config = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(config.log_channel_id, Some(555));
    assert_eq!(config.liveness.url, "https://legacy.example.test");
}

#[tokio::test]
async fn malformed_config_toml_is_an_error() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "owner_id = [").unwrap();
    assert!(Config::load_or_init_in(tmp.path()).await.is_err());
}
