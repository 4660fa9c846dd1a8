pub mod schema;
pub mod store;

pub use schema::{
    Config, GatewayConfig, LifecycleConfig, LivenessConfig, RestartMode, DEFAULT_OWNER_ID,
};
pub use store::{
    load_document, render_template, save_document, ConfigStore, OperationalConfig, StoreError,
    WelcomeConfig, MAX_RESTART_INTERVAL_SECS, MAX_SHUTDOWN_MINUTES, MIN_RESTART_INTERVAL_SECS,
};
