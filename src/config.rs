//! Runtime configuration.
//!
//! The effective configuration is a flat map over a fixed set of keys.
//! Precedence: `system_config` rows > process environment at boot. All keys
//! are required; a missing key fails boot (exit non-zero) or rejects an
//! admin update with 400. The live map sits behind a `tokio::sync::RwLock`
//! in `AppState` and is swapped atomically on reload.

use std::collections::HashMap;
use std::env;

use dotenvy::dotenv;

use crate::error::GatewayError;

/// Every key the configuration plane recognizes. Anything else in a
/// `POST /admin/config` payload is ignored.
pub const CONFIG_KEYS: [&str; 8] = [
    "OPENROUTER_API_KEY",
    "ADMIN_API_KEY",
    "OPENROUTER_HTTP_REFERER",
    "OPENROUTER_X_TITLE",
    "LOG_MODE",
    "REDIS_URL",
    "DATABASE_URL",
    "WEBUI_DATABASE_URL",
];

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    values: HashMap<String, String>,
}

impl RuntimeConfig {
    /// Seed from the process environment. `.env` is honored for local runs.
    pub fn from_env() -> Self {
        dotenv().ok();

        let mut values = HashMap::new();
        for key in CONFIG_KEYS {
            if let Ok(value) = env::var(key)
                && !value.trim().is_empty()
            {
                values.insert(key.to_string(), value);
            }
        }
        Self { values }
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// Replace the whole map. Used on reload; partial updates never reach
    /// the runtime.
    pub fn apply(&mut self, values: HashMap<String, String>) {
        self.values = values;
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.values.clone()
    }

    /// Recognized keys whose value is absent or blank.
    pub fn missing_keys(&self) -> Vec<String> {
        CONFIG_KEYS
            .iter()
            .filter(|k| self.get(k).trim().is_empty())
            .map(|k| k.to_string())
            .collect()
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        let missing = self.missing_keys();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::ConfigMissing(missing))
        }
    }

    pub fn openrouter_api_key(&self) -> &str {
        self.get("OPENROUTER_API_KEY")
    }

    pub fn admin_api_key(&self) -> &str {
        self.get("ADMIN_API_KEY")
    }

    pub fn http_referer(&self) -> &str {
        self.get("OPENROUTER_HTTP_REFERER")
    }

    pub fn x_title(&self) -> &str {
        self.get("OPENROUTER_X_TITLE")
    }

    /// `LOG_MODE=off` disables metadata logging; quota accounting is
    /// unaffected.
    pub fn log_mode_off(&self) -> bool {
        self.get("LOG_MODE") == "off"
    }

    pub fn redis_url(&self) -> &str {
        self.get("REDIS_URL")
    }

    pub fn database_url(&self) -> &str {
        self.get("DATABASE_URL")
    }

    pub fn webui_database_url(&self) -> &str {
        self.get("WEBUI_DATABASE_URL")
    }

    /// The map with credential-bearing values masked, for `GET /admin/config`.
    pub fn masked_map(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let shown = if is_sensitive_key(k) {
                    mask_value(v)
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }
}

/// Keys whose values must never be rendered in full.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_uppercase();
    key.contains("KEY") || key.contains("PASSWORD") || key.contains("SECRET")
}

/// Mask a secret: first 4 + eight stars + last 4, or all stars when the
/// value is too short to safely show any of it.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "********".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}********{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_map() -> HashMap<String, String> {
        CONFIG_KEYS
            .iter()
            .map(|k| (k.to_string(), format!("value-for-{k}")))
            .collect()
    }

    #[test]
    fn mask_is_a_function_of_length() {
        assert_eq!(mask_value(""), "********");
        assert_eq!(mask_value("short"), "********");
        assert_eq!(mask_value("12345678"), "********");
        assert_eq!(mask_value("sk-or-v1-abcdef1234"), "sk-o********1234");
    }

    #[test]
    fn sensitive_keys_by_substring() {
        assert!(is_sensitive_key("OPENROUTER_API_KEY"));
        assert!(is_sensitive_key("ADMIN_API_KEY"));
        assert!(!is_sensitive_key("LOG_MODE"));
        assert!(!is_sensitive_key("REDIS_URL"));
    }

    #[test]
    fn validate_reports_every_missing_key() {
        let mut map = full_map();
        map.remove("OPENROUTER_API_KEY");
        map.insert("REDIS_URL".to_string(), "   ".to_string());

        let cfg = RuntimeConfig::from_map(map);
        let missing = cfg.missing_keys();
        assert!(missing.contains(&"OPENROUTER_API_KEY".to_string()));
        assert!(missing.contains(&"REDIS_URL".to_string()));
        assert_eq!(missing.len(), 2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn complete_map_validates() {
        let cfg = RuntimeConfig::from_map(full_map());
        assert!(cfg.validate().is_ok());
        assert!(!cfg.log_mode_off());
    }

    #[test]
    fn masked_map_leaves_plain_values_alone() {
        let mut map = full_map();
        map.insert(
            "OPENROUTER_API_KEY".to_string(),
            "sk-or-v1-abcdef1234".to_string(),
        );
        map.insert("LOG_MODE".to_string(), "metadata".to_string());

        let masked = RuntimeConfig::from_map(map).masked_map();
        assert_eq!(masked["OPENROUTER_API_KEY"], "sk-o********1234");
        assert_eq!(masked["LOG_MODE"], "metadata");
    }

    #[test]
    fn apply_swaps_the_whole_map() {
        let mut cfg = RuntimeConfig::from_map(full_map());
        let mut next = full_map();
        next.insert("LOG_MODE".to_string(), "off".to_string());
        cfg.apply(next);
        assert!(cfg.log_mode_off());
    }
}
