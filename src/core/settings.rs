// src/core/settings.rs

use crate::constants::SETTINGS_FILENAME;
use crate::core::capabilities::ConfigurationError;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

/// External, non-capability settings such as `CAPS`.
///
/// Values come from the process environment first, then from an optional
/// `atd.toml` file in the working directory.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    env: HashMap<String, String>,
    file: HashMap<String, String>,
}

impl Settings {
    /// Loads `atd.toml` from `working_dir` (if present) and snapshots the environment.
    pub fn load(working_dir: &Path) -> Result<Self, ConfigurationError> {
        let file = read_settings_file(&working_dir.join(SETTINGS_FILENAME))?;
        Ok(Self {
            env: unicode_vars(std::env::vars_os()).collect(),
            file,
        })
    }

    /// Builds settings from explicit sources. Environment entries win over file entries.
    pub fn from_sources(env: HashMap<String, String>, file: HashMap<String, String>) -> Self {
        Self { env, file }
    }

    /// The value of setting `name`, if either source defines it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.env
            .get(name)
            .or_else(|| self.file.get(name))
            .map(String::as_str)
    }
}

/// Keeps the variables whose name and value are both valid Unicode. Others
/// can never be a setting or an override, so they are skipped.
pub(crate) fn unicode_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (Ok(name), Err(_)) => {
                log::debug!("Ignoring variable '{}': value is not valid Unicode.", name);
                None
            }
            (Err(name), _) => {
                log::debug!("Ignoring variable {:?}: name is not valid Unicode.", name);
                None
            }
        })
}

fn read_settings_file(path: &Path) -> Result<HashMap<String, String>, ConfigurationError> {
    if !path.is_file() {
        log::debug!("No settings file at '{}'.", path.display());
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigurationError::Settings {
        path: path.display().to_string(),
        source: e,
    })
}
