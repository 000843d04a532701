//! Tunable constants for the Sync Manager (spec.md §4.4), following
//! `bae-core::config::ConfigYaml`'s `#[serde(default = "...")]`-per-field
//! style so a host can override any of them from its own config file without
//! the struct ever failing to deserialize on a partial document.
use serde::{Deserialize, Serialize};

fn default_per_sync_item_upload_limit() -> u32 {
    150
}

fn default_major_data_change_threshold() -> u32 {
    15
}

fn default_max_discordance_before_out_of_sync() -> u32 {
    5
}

fn default_actively_edited_window_secs() -> u64 {
    20
}

fn default_out_of_sync_page_limit() -> u32 {
    500
}

fn default_watchdog_poll_interval_ms() -> u64 {
    500
}

fn default_watchdog_timeout_ms() -> u64 {
    5000
}

fn default_api_version() -> String {
    "20190520".to_string()
}

fn default_app_domain() -> String {
    "org.vaultkit.app".to_string()
}

/// See spec.md §4.4.2–§4.4.7 for what each constant gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_per_sync_item_upload_limit")]
    pub per_sync_item_upload_limit: u32,
    #[serde(default = "default_major_data_change_threshold")]
    pub major_data_change_threshold: u32,
    #[serde(default = "default_max_discordance_before_out_of_sync")]
    pub max_discordance_before_out_of_sync: u32,
    /// Open Question in spec.md §9, resolved as configurable with the
    /// original 20-second default.
    #[serde(default = "default_actively_edited_window_secs")]
    pub actively_edited_window_secs: u64,
    #[serde(default = "default_out_of_sync_page_limit")]
    pub out_of_sync_page_limit: u32,
    #[serde(default = "default_watchdog_poll_interval_ms")]
    pub watchdog_poll_interval_ms: u64,
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// The `appData` namespace key content-equality comparisons filter
    /// `client_updated_at` (and any other configured ignore keys) out of
    /// (spec.md §3).
    #[serde(default = "default_app_domain")]
    pub app_domain: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            per_sync_item_upload_limit: default_per_sync_item_upload_limit(),
            major_data_change_threshold: default_major_data_change_threshold(),
            max_discordance_before_out_of_sync: default_max_discordance_before_out_of_sync(),
            actively_edited_window_secs: default_actively_edited_window_secs(),
            out_of_sync_page_limit: default_out_of_sync_page_limit(),
            watchdog_poll_interval_ms: default_watchdog_poll_interval_ms(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            api_version: default_api_version(),
            app_domain: default_app_domain(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.per_sync_item_upload_limit, 150);
        assert_eq!(config.major_data_change_threshold, 15);
        assert_eq!(config.max_discordance_before_out_of_sync, 5);
        assert_eq!(config.actively_edited_window_secs, 20);
        assert_eq!(config.out_of_sync_page_limit, 500);
        assert_eq!(config.watchdog_poll_interval_ms, 500);
        assert_eq!(config.watchdog_timeout_ms, 5000);
        assert_eq!(config.api_version, "20190520");
        assert_eq!(config.app_domain, "org.vaultkit.app");
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.per_sync_item_upload_limit, 150);

        let config: SyncConfig =
            serde_json::from_str(r#"{"per_sync_item_upload_limit": 50}"#).unwrap();
        assert_eq!(config.per_sync_item_upload_limit, 50);
        assert_eq!(config.major_data_change_threshold, 15);
    }
}
