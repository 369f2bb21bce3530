pub const APP_NAME: &str = "proctree";

// Environment overrides
pub const CONFIG_ENV: &str = "PROCTREE_CONFIG";
pub const LOG_ENV: &str = "PROCTREE_LOG";

// Persistent configuration lives under ~/.proctree/
pub const CONFIG_DIRECTORY: &str = ".proctree";
pub const CONFIG_FILE_NAME: &str = "config.json";

// Used when neither --log-level, PROCTREE_LOG nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "warn,proctree=info";
