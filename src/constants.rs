// src/constants.rs

/// Namespace tag every environment override must start with.
pub const OVERRIDE_PREFIX: &str = "atd";

/// Separator between the segments of an override path.
pub const PATH_SEPARATOR: &str = "_";

/// Directory (under the working directory) holding the default capability file.
pub const CAPS_DIR: &str = "caps";

/// The name of the default capability file.
pub const CAPS_FILENAME: &str = "capabilities.json";

/// The external setting that points at a user-defined capability file.
pub const CAPS_SETTING: &str = "CAPS";

/// The optional settings file read from the working directory.
pub const SETTINGS_FILENAME: &str = "atd.toml";

/// Host of the result reporting service.
pub const SERVICE_HOST_KEY: &str = "ATDServiceHost";
/// Port of the result reporting service.
pub const SERVICE_PORT_KEY: &str = "ATDServicePort";

/// Array of host machine entries.
pub const HOST_MACHINES_KEY: &str = "hostMachines";
/// Identifies a host machine entry.
pub const MACHINE_IP_KEY: &str = "machineIP";
/// Top-level flag telling device discovery to ignore locally attached devices.
pub const EXCLUDE_LOCAL_DEVICES_KEY: &str = "excludeLocalDevices";

/// Port the Appium server of a host listens on.
pub const APPIUM_PORT_PROPERTY: &str = "appiumPort";
/// Location of the Appium server on a host.
pub const APPIUM_SERVER_PATH_PROPERTY: &str = "appiumServerPath";
/// Marks a host as a remote device farm.
pub const IS_CLOUD_PROPERTY: &str = "isCloud";
/// Port of the remote Appium manager on a host.
pub const REMOTE_MANAGER_PORT_PROPERTY: &str = "remoteAppiumManagerPort";

/// Used when no host machine entry defines `remoteAppiumManagerPort`.
pub const DEFAULT_REMOTE_MANAGER_PORT: &str = "4567";

/// Path of the results endpoint on the reporting service.
pub const RESULTS_ENDPOINT_PATH: &str = "testresults";

/// The only status the lifecycle ever reports.
pub const COMPLETED_STATUS: &str = "Completed";
