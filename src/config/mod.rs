pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_global_settings, load_settings};
pub use paths::{
    default_global_config_path, default_state_root, CONFIG_PATH_ENV, GLOBAL_SETTINGS_FILE_NAME,
    GLOBAL_STATE_DIR,
};
pub use settings::{
    CapabilityCommandConfig, CapabilitySettings, EngineSettings, Settings, StoreKind,
    DEFAULT_CAPABILITY_TIMEOUT_SECONDS, DEFAULT_LOW_CONFIDENCE_THRESHOLD,
    DEFAULT_REQUEST_CONTEXT_MAX_CHARS, DEFAULT_RUN_LEASE_SECONDS, MIN_REQUEST_CONTEXT_MAX_CHARS,
};
