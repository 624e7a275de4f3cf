// src/models.rs

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// --- CAPABILITY TREE ---

/// An ordered mapping of capability keys to subtrees.
pub type ConfigMap = IndexMap<String, ConfigTree>;

/// A resolved capability node. Every leaf is a string: overrides flatten
/// booleans and numbers to text, so typed accessors re-parse on read.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigTree {
    /// A leaf, as text.
    Scalar(String),
    /// A nested mapping.
    Object(ConfigMap),
    /// A sequence.
    Array(Vec<ConfigTree>),
}

impl ConfigTree {
    /// Returns the leaf text, or `None` for objects and arrays.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the mapping, or `None` for leaves and arrays.
    pub fn as_object(&self) -> Option<&ConfigMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the items, or `None` for leaves and objects.
    pub fn as_array(&self) -> Option<&[ConfigTree]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Parses a leaf as a boolean. Anything but a case-insensitive `true` is `false`.
    pub fn as_bool(&self) -> bool {
        self.as_str()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("true"))
    }
}

impl fmt::Display for ConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

// --- DEVICES ---

/// A device handed out by the allocation service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Unique device identifier.
    pub udid: String,
    /// Human-readable device name.
    pub name: String,
    /// Hardware model, used to name log artifacts.
    pub model: String,
    /// Mobile platform name, e.g. `ANDROID` or `iOS`.
    pub platform: String,
    /// The host machine running the Appium server for this device.
    pub host_name: String,
    /// Device and driver are managed by a remote device farm.
    #[serde(default)]
    pub is_cloud: bool,
}

// --- TEST METHODS ---

/// Identity of a test method, as handed over by the outer runner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TestMethod {
    /// Method name.
    pub name: String,
    /// Name of the declaring test class.
    pub class_name: String,
    /// Description carried over from previous invocations, if any.
    pub description: Option<String>,
}

impl TestMethod {
    /// A method without a carried description.
    pub fn new(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            description: None,
        }
    }

    /// `Class::method`, the key used by [`MetadataRegistry`].
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.class_name, self.name)
    }
}

/// Declarative per-test directives, resolved once before execution.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TestMetadata {
    /// Added to the description of every run.
    pub author: Option<String>,
    /// Skip the test when the active driver runs this platform.
    pub skip_on_platform: Option<String>,
    /// Number of extra attempts granted to a failing test.
    pub retry_count: Option<u32>,
}

/// Lookup table of [`TestMetadata`] keyed by `Class::method`.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entries: HashMap<String, TestMetadata>,
}

impl MetadataRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the directives of `method`, replacing earlier ones.
    pub fn insert(&mut self, method: &TestMethod, metadata: TestMetadata) {
        self.entries.insert(method.qualified_name(), metadata);
    }

    /// Returns the directives for a method; undecorated methods get the empty record.
    pub fn get(&self, method: &TestMethod) -> TestMetadata {
        self.entries
            .get(&method.qualified_name())
            .cloned()
            .unwrap_or_default()
    }
}

/// Final status of one invocation as seen by the outer runner.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// The body completed.
    Success,
    /// The body failed or panicked.
    Failure,
    /// The body did not run to completion on purpose.
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "PASS",
            Self::Failure => "FAIL",
            Self::Skipped => "SKIP",
        };
        f.write_str(label)
    }
}

/// Log artifact name to path, produced when log capture stops.
pub type LogMap = IndexMap<String, String>;

/// Bookkeeping for one running driver session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// The test result the session serves.
    pub result_id: Uuid,
    /// `Class::method` of the test.
    pub method: String,
    /// The device the session drives, if one was allocated.
    pub device_udid: Option<String>,
}

/// Payload of a single report to the results service.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    /// Always `Completed`.
    pub status: String,
    /// Method name.
    pub test_name: String,
    /// Declaring class name.
    pub class_name: String,
    /// `PASS`, `FAIL` or `SKIP`.
    pub test_status: Option<String>,
    /// Device the test ran on.
    pub device_udid: Option<String>,
    /// Log artifacts; empty for skips.
    pub logs: LogMap,
}
