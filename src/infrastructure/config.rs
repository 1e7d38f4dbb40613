use crate::domain::planner::DEFAULT_HARVEST_DURATION_DAYS;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const ENGINE_JSON: &str = "engine.json";
const DEFAULT_LOG_FILTER: &str = "fieldblock=info";

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub engine: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub app_name: String,
    pub timezone: Tz,
    pub default_harvest_duration_days: u32,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "FieldBlock".to_string(),
            timezone: Tz::UTC,
            default_harvest_duration_days: DEFAULT_HARVEST_DURATION_DAYS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FieldBlock",
                "timezone": "UTC"
            }),
        ),
        (
            ENGINE_JSON,
            serde_json::json!({
                "schema": 1,
                "defaultHarvestDurationDays": DEFAULT_HARVEST_DURATION_DAYS,
                "logFilter": DEFAULT_LOG_FILTER
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        engine: read_config(&config_dir.join(ENGINE_JSON))?,
    })
}

fn read_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn load_engine_config(config_dir: &Path) -> Result<EngineConfig, InfraError> {
    let bundle = load_configs(config_dir)?;
    let defaults = EngineConfig::default();

    let timezone = match read_str(&bundle.app, "timezone") {
        Some(name) => name.parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{name}' in {APP_JSON}: {error}"))
        })?,
        None => defaults.timezone,
    };

    let default_harvest_duration_days = match bundle.engine.get("defaultHarvestDurationDays") {
        None | Some(serde_json::Value::Null) => defaults.default_harvest_duration_days,
        Some(value) => value
            .as_u64()
            .and_then(|days| u32::try_from(days).ok())
            .filter(|days| *days > 0)
            .ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "defaultHarvestDurationDays must be a positive integer in {ENGINE_JSON}"
                ))
            })?,
    };

    Ok(EngineConfig {
        app_name: read_str(&bundle.app, "appName")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.app_name),
        timezone,
        default_harvest_duration_days,
        log_filter: read_str(&bundle.engine, "logFilter")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.log_filter),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "fieldblock-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_and_loaded() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");

        let config = load_engine_config(&dir.path).expect("load config");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_harvest_duration_days, 7);
    }

    #[test]
    fn existing_files_are_not_overwritten() {
        let dir = TempConfigDir::new();
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema":1,"appName":"North Farm","timezone":"Asia/Tokyo"}"#,
        )
        .expect("write app config");
        ensure_default_configs(&dir.path).expect("write defaults");

        let config = load_engine_config(&dir.path).expect("load config");
        assert_eq!(config.app_name, "North Farm");
        assert_eq!(config.timezone, chrono_tz::Asia::Tokyo);
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(dir.path.join(ENGINE_JSON), r#"{"schema":2}"#).expect("write engine config");

        let result = load_engine_config(&dir.path);
        assert!(matches!(result, Err(InfraError::InvalidConfig(message)) if message.contains("unsupported schema")));
    }

    #[test]
    fn invalid_values_are_reported() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(
            dir.path.join(ENGINE_JSON),
            r#"{"schema":1,"defaultHarvestDurationDays":0}"#,
        )
        .expect("write engine config");
        assert!(matches!(
            load_engine_config(&dir.path),
            Err(InfraError::InvalidConfig(message)) if message.contains("defaultHarvestDurationDays")
        ));

        fs::write(
            dir.path.join(ENGINE_JSON),
            r#"{"schema":1,"defaultHarvestDurationDays":10}"#,
        )
        .expect("write engine config");
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema":1,"timezone":"Mars/Olympus"}"#,
        )
        .expect("write app config");
        assert!(matches!(
            load_engine_config(&dir.path),
            Err(InfraError::InvalidConfig(message)) if message.contains("timezone")
        ));
    }
}
