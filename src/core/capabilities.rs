//! # Capabilities
//!
//! The resolved capability tree and its typed accessors. A `Capabilities` value is
//! built from a JSON capability file merged with `atd*` environment overrides (see
//! [`override_resolver`](crate::core::override_resolver)); the process-wide instance
//! lives in [`state`](crate::state).
//!
//! Accessors are best-effort: a missing key falls back to a documented default.
//! The exceptions are [`Capabilities::array`] and the host machine property lookups,
//! which report an [`AccessError`].

use crate::constants::{
    APPIUM_PORT_PROPERTY, APPIUM_SERVER_PATH_PROPERTY, CAPS_DIR, CAPS_FILENAME, CAPS_SETTING,
    DEFAULT_REMOTE_MANAGER_PORT, EXCLUDE_LOCAL_DEVICES_KEY, HOST_MACHINES_KEY, IS_CLOUD_PROPERTY,
    MACHINE_IP_KEY, REMOTE_MANAGER_PORT_PROPERTY, RESULTS_ENDPOINT_PATH, SERVICE_HOST_KEY,
    SERVICE_PORT_KEY,
};
use crate::core::override_resolver::{self, EnvOverrides};
use crate::core::settings::Settings;
use crate::models::{ConfigMap, ConfigTree};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// The capability store could not be built. Fatal on first access.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The current directory is unavailable.
    #[error("Could not determine the working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
    /// A capability or settings file could not be read.
    #[error("Could not read '{path}': {source}")]
    Read {
        /// The file.
        path: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The capability file is not valid JSON.
    #[error("Error parsing JSON in '{path}': {source}")]
    JsonParse {
        /// The file, or `<inline>` for in-memory documents.
        path: String,
        /// The parser failure.
        #[source]
        source: serde_json::Error,
    },
    /// The capability document is valid JSON but not an object.
    #[error("Capability file '{path}' must contain a JSON object at its root.")]
    RootNotObject {
        /// The file, or `<inline>` for in-memory documents.
        path: String,
    },
    /// The `CAPS` setting does not expand to a usable path.
    #[error("Invalid CAPS path '{value}': {reason}")]
    InvalidCapsPath {
        /// The setting as written.
        value: String,
        /// Why expansion failed.
        reason: String,
    },
    /// `atd.toml` is not a flat table of strings.
    #[error("Error parsing settings file '{path}': {source}")]
    Settings {
        /// The settings file.
        path: String,
        /// The parser failure.
        #[source]
        source: toml::de::Error,
    },
}

/// A typed lookup into the resolved tree failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// An array was expected under `key`.
    #[error("Capability '{key}' is missing or is not an array.")]
    NotAnArray {
        /// The top-level key.
        key: String,
    },
    /// No entry for `host` carries `property`.
    #[error("No host machine '{host}' defines '{property}'.")]
    HostPropertyNotFound {
        /// The `machineIP` looked up.
        host: String,
        /// The property looked up.
        property: String,
    },
    /// The property exists but is an object or an array.
    #[error("Property '{property}' of host machine '{host}' is not a plain value.")]
    NotAScalar {
        /// The `machineIP` looked up.
        host: String,
        /// The property looked up.
        property: String,
    },
}

/// Returns the capability file to load.
///
/// Defaults to `{working_dir}/caps/capabilities.json`. A `CAPS` setting replaces
/// it; `~` and `$VAR` are expanded and relative paths are taken from `working_dir`.
/// An absolute `CAPS` path is returned as written.
pub fn capability_location(
    working_dir: &Path,
    settings: &Settings,
) -> Result<PathBuf, ConfigurationError> {
    let Some(caps) = settings.get(CAPS_SETTING) else {
        return Ok(working_dir.join(CAPS_DIR).join(CAPS_FILENAME));
    };

    let expanded = shellexpand::full(caps).map_err(|e| ConfigurationError::InvalidCapsPath {
        value: caps.to_string(),
        reason: e.to_string(),
    })?;
    if expanded.trim().is_empty() {
        return Err(ConfigurationError::InvalidCapsPath {
            value: caps.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    let user_path = PathBuf::from(expanded.into_owned());
    if user_path.is_absolute() {
        return Ok(user_path);
    }

    // A missing file is reported on read, so fall back to a lexical cleanup.
    let joined = working_dir.join(user_path);
    Ok(dunce::canonicalize(&joined).unwrap_or_else(|_| normalize_lexically(&joined)))
}

/// Drops `.` segments and folds `..` into its parent without touching the disk.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The resolved capability tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    root: ConfigMap,
}

impl Capabilities {
    /// Wraps an already-resolved tree.
    pub fn new(root: ConfigMap) -> Self {
        Self { root }
    }

    /// Builds the store the way the process-wide instance is built: locate the
    /// file from the working directory and settings, then apply the `atd*`
    /// variables of the current environment.
    pub fn from_environment() -> Result<Self, ConfigurationError> {
        let working_dir = std::env::current_dir().map_err(ConfigurationError::WorkingDir)?;
        let settings = Settings::load(&working_dir)?;
        let path = capability_location(&working_dir, &settings)?;
        Self::load(&path, &EnvOverrides::from_env())
    }

    /// Reads a capability file and resolves it against `overrides`.
    pub fn load(path: &Path, overrides: &EnvOverrides) -> Result<Self, ConfigurationError> {
        log::debug!("Loading capabilities from '{}'.", path.display());
        let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&content, overrides).map_err(|e| match e {
            ConfigurationError::JsonParse { source, .. } => ConfigurationError::JsonParse {
                path: path.display().to_string(),
                source,
            },
            ConfigurationError::RootNotObject { .. } => ConfigurationError::RootNotObject {
                path: path.display().to_string(),
            },
            other => other,
        })
    }

    /// Parses and resolves an in-memory capability document.
    pub fn from_json_str(
        content: &str,
        overrides: &EnvOverrides,
    ) -> Result<Self, ConfigurationError> {
        let document: Value =
            serde_json::from_str(content).map_err(|e| ConfigurationError::JsonParse {
                path: "<inline>".to_string(),
                source: e,
            })?;
        let Value::Object(source) = document else {
            return Err(ConfigurationError::RootNotObject {
                path: "<inline>".to_string(),
            });
        };
        log::debug!(
            "Resolving {} top-level capabilities against {} override(s).",
            source.len(),
            overrides.len()
        );
        let root = override_resolver::resolve(&source, |name| overrides.lookup(name));
        Ok(Self::new(root))
    }

    /// The whole resolved tree.
    pub fn tree(&self) -> &ConfigMap {
        &self.root
    }

    /// The mapping stored under `key`.
    pub fn object(&self, key: &str) -> Option<&ConfigMap> {
        self.root.get(key).and_then(ConfigTree::as_object)
    }

    /// The sequence stored under `key`.
    pub fn array(&self, key: &str) -> Result<&[ConfigTree], AccessError> {
        self.root
            .get(key)
            .and_then(ConfigTree::as_array)
            .ok_or_else(|| AccessError::NotAnArray {
                key: key.to_string(),
            })
    }

    /// `false` both when the key is absent and when it holds `false`.
    pub fn bool(&self, key: &str) -> bool {
        self.root.get(key).is_some_and(ConfigTree::as_bool)
    }

    /// `{host, port}` of the results service, or an empty map unless both are set.
    pub fn mongo_host_and_port(&self) -> HashMap<String, String> {
        let host = self.root.get(SERVICE_HOST_KEY).and_then(ConfigTree::as_str);
        let port = self.root.get(SERVICE_PORT_KEY).and_then(ConfigTree::as_str);
        match (host, port) {
            (Some(host), Some(port)) => HashMap::from([
                ("host".to_string(), host.to_string()),
                ("port".to_string(), port.to_string()),
            ]),
            _ => HashMap::new(),
        }
    }

    /// `http://{host}:{port}/testresults` when the results service is configured.
    pub fn reporting_url(&self) -> Option<String> {
        let params = self.mongo_host_and_port();
        let host = params.get("host")?;
        let port = params.get("port")?;
        Some(format!("http://{}:{}/{}", host, port, RESULTS_ENDPOINT_PATH))
    }

    /// The `hostMachines` entries.
    pub fn host_machines(&self) -> Result<&[ConfigTree], AccessError> {
        self.array(HOST_MACHINES_KEY)
    }

    /// Device discovery should skip locally attached devices.
    pub fn exclude_local_devices(&self) -> bool {
        self.bool(EXCLUDE_LOCAL_DEVICES_KEY)
    }

    /// The `iOS` capabilities declare an app.
    pub fn is_app(&self) -> bool {
        self.ios_app().is_some()
    }

    /// An app build for the iOS simulator is configured.
    pub fn is_simulator_app_present(&self) -> bool {
        self.ios_app()
            .and_then(ConfigTree::as_object)
            .is_some_and(|app| app.contains_key("simulator"))
    }

    /// An app build for real iOS devices is configured.
    pub fn is_real_device_app_present(&self) -> bool {
        self.ios_app()
            .and_then(ConfigTree::as_object)
            .is_some_and(|app| app.contains_key("device"))
    }

    fn ios_app(&self) -> Option<&ConfigTree> {
        self.object("iOS").and_then(|ios| ios.get("app"))
    }

    /// Looks up `property` on the first host machine entry, in array order, whose
    /// `machineIP` matches `host_ip` (ignoring case) and which defines it.
    pub fn server_property(&self, host_ip: &str, property: &str) -> Result<&ConfigTree, AccessError> {
        let not_found = || AccessError::HostPropertyNotFound {
            host: host_ip.to_string(),
            property: property.to_string(),
        };
        self.host_machines()
            .map_err(|_| not_found())?
            .iter()
            .filter_map(ConfigTree::as_object)
            .filter(|entry| {
                entry
                    .get(MACHINE_IP_KEY)
                    .and_then(ConfigTree::as_str)
                    .is_some_and(|ip| ip.eq_ignore_ascii_case(host_ip))
            })
            .find_map(|entry| entry.get(property))
            .ok_or_else(not_found)
    }

    fn server_scalar(&self, host_ip: &str, property: &str) -> Result<String, AccessError> {
        self.server_property(host_ip, property)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AccessError::NotAScalar {
                host: host_ip.to_string(),
                property: property.to_string(),
            })
    }

    /// `appiumServerPath` of the host.
    pub fn appium_server_path(&self, host_ip: &str) -> Result<String, AccessError> {
        self.server_scalar(host_ip, APPIUM_SERVER_PATH_PROPERTY)
    }

    /// `appiumPort` of the host.
    pub fn appium_server_port(&self, host_ip: &str) -> Result<String, AccessError> {
        self.server_scalar(host_ip, APPIUM_PORT_PROPERTY)
    }

    /// Any lookup failure counts as "not cloud".
    pub fn is_cloud(&self, host_ip: &str) -> bool {
        self.server_property(host_ip, IS_CLOUD_PROPERTY)
            .map(ConfigTree::as_bool)
            .unwrap_or(false)
    }

    /// `remoteAppiumManagerPort` of the host, `4567` when unset.
    pub fn remote_manager_port(&self, host_ip: &str) -> String {
        self.server_scalar(host_ip, REMOTE_MANAGER_PORT_PROPERTY)
            .unwrap_or_else(|_| DEFAULT_REMOTE_MANAGER_PORT.to_string())
    }
}
