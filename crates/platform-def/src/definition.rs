//! Definition document types
//!
//! A definition document declares a platform: its name, machine defaults,
//! reusable classes and the hosts to run. Every override object is a partial
//! patch; a key that is absent leaves the field alone while an explicit
//! `null` clears it.

use crate::machine::DiskSpec;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Only format version this tool understands
pub const SUPPORTED_FORMAT_VERSION: u32 = 4;

/// Three-state field of an override object
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    /// Key not present; keep the inherited value
    #[default]
    Absent,
    /// Key present with `null`; reset the field
    Clear,
    /// Key present with a value; replace the field
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    /// Apply to an optional field
    pub fn apply_to(&self, slot: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            Patch::Absent => {}
            Patch::Clear => *slot = None,
            Patch::Set(value) => *slot = Some(value.clone()),
        }
    }
}

// `#[serde(default)]` yields `Absent` for missing keys; a present key lands here.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Patch::Set(value),
            None => Patch::Clear,
        })
    }
}

/// Partial machine configuration used by defaults, classes and hosts
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MachineOverride {
    /// Parent class applied before this object
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub cpu_percent: Patch<f64>,
    #[serde(default)]
    pub vcpu_count: Patch<u32>,
    #[serde(default)]
    pub mem_mb: Patch<u64>,
    #[serde(default)]
    pub networks: Patch<Vec<String>>,
    /// Replaces the whole disk list
    #[serde(default)]
    pub disks: Patch<Vec<DiskSpec>>,
    #[serde(default)]
    pub one_template: Patch<String>,
    #[serde(default)]
    pub group: Patch<String>,
    /// Octal triple such as "640", checked during resolution
    #[serde(default)]
    pub permissions: Patch<String>,
    /// Keys this tool does not know; reported, never applied
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

/// Host entries in document order, duplicates kept so they can be rejected
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEntries(pub Vec<(String, MachineOverride)>);

impl HostEntries {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MachineOverride)> {
        self.0.iter().map(|(key, host)| (key.as_str(), host))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for HostEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = HostEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of host name to machine override")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, MachineOverride>()? {
                    entries.push((key, value));
                }
                Ok(HostEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// `format_version` as written: JSON number or numeric string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion(pub u32);

impl<'de> Deserialize<'de> for FormatVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(version) => Ok(FormatVersion(version)),
            Raw::Text(text) => text
                .trim()
                .parse()
                .map(FormatVersion)
                .map_err(|_| de::Error::custom(format!("format_version '{}' is not an integer", text))),
        }
    }
}

/// Just enough of a document to check its version before decoding the rest
#[derive(Debug, Deserialize)]
pub(crate) struct VersionProbe {
    #[serde(alias = "formatVersion")]
    pub format_version: FormatVersion,
}

/// A complete definition document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DefinitionDocument {
    #[serde(alias = "formatVersion")]
    pub format_version: FormatVersion,
    #[serde(alias = "platformName")]
    pub platform_name: String,
    /// Applied to every host before its class chain
    #[serde(default)]
    pub defaults: Option<MachineOverride>,
    #[serde(default)]
    pub classes: BTreeMap<String, MachineOverride>,
    pub hosts: HostEntries,
}
