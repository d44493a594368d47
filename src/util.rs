const DEBUG: &str = "DEBUG";

/// Verbose logging is enabled by setting `DEBUG` to any value.
pub fn debug_enabled() -> bool {
    std::env::var_os(DEBUG).is_some()
}

const BRIDGE_CONFIG: &str = "BRIDGE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "config.json";

pub fn get_default_config_file() -> String {
    std::env::var(BRIDGE_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
}
