use std::{collections::HashMap, fs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bridge_url: String,
    pub contract_address: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:9545".into(),
            contract_address: "0x348ead3ebFC44bf70c93D89dd0cD1A22530a892C".into(),
        }
    }
}

/// Defaults, overlaid by `console.toml` (or an explicit file), overlaid by
/// `APP__*` environment variables.
pub fn load_settings(path: Option<&str>) -> Settings {
    let mut settings = Settings::default();

    let path = path.unwrap_or("console.toml");
    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bridge_url") {
                settings.bridge_url = v.clone();
            }
            if let Some(v) = file_cfg.get("contract_address") {
                settings.contract_address = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("APP__BRIDGE_URL") {
        settings.bridge_url = v;
    }
    if let Ok(v) = std::env::var("APP__CONTRACT_ADDRESS") {
        settings.contract_address = v;
    }

    settings
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::Mutex,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    // Serializes the tests that read or write APP__* process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn temp_settings_file(contents: &str) -> std::path::PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("console_settings_test_{suffix}.toml"));
        fs::write(&path, contents).expect("write settings");
        path
    }

    #[test]
    fn defaults_point_at_local_bridge_and_known_contract() {
        let settings = Settings::default();
        assert_eq!(settings.bridge_url, "http://127.0.0.1:9545");
        assert!(settings.contract_address.starts_with("0x348ead"));
    }

    #[test]
    fn file_settings_overlay_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let path = temp_settings_file("bridge_url = \"http://10.0.0.5:9545\"\n");

        let settings = load_settings(path.to_str());
        assert_eq!(settings.bridge_url, "http://10.0.0.5:9545");
        assert_eq!(
            settings.contract_address,
            Settings::default().contract_address
        );

        fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn env_settings_overlay_file_and_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let path = temp_settings_file("bridge_url = \"http://10.0.0.5:9545\"\n");
        env::set_var("APP__BRIDGE_URL", "http://192.168.1.20:9545");

        let settings = load_settings(path.to_str());
        assert_eq!(settings.bridge_url, "http://192.168.1.20:9545");
        assert_eq!(
            settings.contract_address,
            Settings::default().contract_address
        );

        env::remove_var("APP__BRIDGE_URL");
        fs::remove_file(path).expect("cleanup");
    }
}
