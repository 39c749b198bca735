use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const MIN_TICK_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "TaskTrack",
        "timezone": "UTC",
        "remote": {
            "baseUrl": null,
            "authToken": null
        },
        "timer": {
            "tickIntervalMs": DEFAULT_TICK_INTERVAL_MS
        }
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
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

pub fn load_app_config(config_dir: &Path) -> Result<serde_json::Value, InfraError> {
    read_config(&config_dir.join(APP_JSON))
}

/// Reference zone for cutting instants into calendar days. Missing or blank
/// means UTC; an unknown zone name is a config error.
pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = load_app_config(config_dir)?;
    let Some(name) = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(Tz::UTC);
    };
    name.parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("unknown timezone '{name}': {error}")))
}

pub fn read_remote_settings(config_dir: &Path) -> Result<RemoteSettings, InfraError> {
    let app = load_app_config(config_dir)?;
    let remote = app.get("remote");
    let field = |name: &str| {
        remote
            .and_then(|value| value.get(name))
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };
    Ok(RemoteSettings {
        base_url: field("baseUrl"),
        auth_token: field("authToken"),
    })
}

pub fn read_tick_interval(config_dir: &Path) -> Result<Duration, InfraError> {
    let app = load_app_config(config_dir)?;
    let millis = app
        .get("timer")
        .and_then(|timer| timer.get("tickIntervalMs"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_TICK_INTERVAL_MS)
        .max(MIN_TICK_INTERVAL_MS);
    Ok(Duration::from_millis(millis))
}

pub fn save_timezone(config_dir: &Path, timezone: &str) -> Result<(), InfraError> {
    let timezone = timezone.trim();
    timezone
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("unknown timezone '{timezone}': {error}")))?;

    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "timezone".to_string(),
        serde_json::Value::String(timezone.to_string()),
    );

    let formatted = serde_json::to_string_pretty(&app)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
