//! Configuration loading
//!
//! TOML, JSON and YAML files are read into a common `serde_json::Value`
//! representation so that partial files can be layered over defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Read a configuration file into a JSON value, picking the format by extension
pub fn load_value(path: &Path) -> crate::Result<serde_json::Value> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let content = std::fs::read_to_string(path)?;

    let value = match extension.as_str() {
        "toml" => {
            let toml_value: toml::Value = toml::from_str(&content)
                .map_err(|e| crate::UtilError::Config(format!("TOML parse error: {e}")))?;
            serde_json::to_value(toml_value)
                .map_err(|e| crate::UtilError::Config(format!("TOML conversion error: {e}")))?
        }
        "json" => serde_json::from_str(&content)
            .map_err(|e| crate::UtilError::Config(format!("JSON parse error: {e}")))?,
        "yml" | "yaml" => serde_yaml::from_str(&content)
            .map_err(|e| crate::UtilError::Config(format!("YAML parse error: {e}")))?,
        _ => {
            return Err(crate::UtilError::Config(format!(
                "Unsupported config format: {extension}"
            )));
        }
    };

    Ok(value)
}

/// Merge two JSON values (second overrides first, objects merged key by key)
fn merge_json_values(base: &mut serde_json::Value, override_value: serde_json::Value) {
    match (base, override_value) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(override_obj)) => {
            for (key, value) in override_obj {
                match base_obj.get_mut(&key) {
                    Some(existing) => merge_json_values(existing, value),
                    None => {
                        base_obj.insert(key, value);
                    }
                }
            }
        }
        (base_value, override_value) => {
            *base_value = override_value;
        }
    }
}

/// Layer `override_value` over the serialized form of `base`
fn merge_value_into<T>(base: &mut T, override_value: serde_json::Value) -> crate::Result<()>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let mut base_value = serde_json::to_value(&*base)
        .map_err(|e| crate::UtilError::Config(format!("Base serialization error: {e}")))?;

    merge_json_values(&mut base_value, override_value);

    *base = serde_json::from_value(base_value).map_err(|e| {
        crate::UtilError::Config(format!("Invalid configuration value: {e}"))
    })?;

    Ok(())
}

/// Configuration builder: defaults, then files, then explicit overrides
#[derive(Debug)]
pub struct ConfigBuilder<T> {
    config: T,
}

impl<T> ConfigBuilder<T>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
{
    /// Create new config builder with defaults
    pub fn new() -> Self {
        Self {
            config: T::default(),
        }
    }

    /// Layer a (possibly partial) configuration file over the current values
    pub fn load_file(mut self, path: &Path) -> crate::Result<Self> {
        let value = load_value(path)?;
        merge_value_into(&mut self.config, value)?;
        Ok(self)
    }

    /// Like [`Self::load_file`], but a missing file leaves the config untouched
    pub fn load_file_if_exists(self, path: &Path) -> crate::Result<Self> {
        if path.is_file() {
            self.load_file(path)
        } else {
            Ok(self)
        }
    }

    /// Finish building
    pub fn build(self) -> T {
        self.config
    }
}

impl<T> Default for ConfigBuilder<T>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
{
    fn default() -> Self {
        Self::new()
    }
}
