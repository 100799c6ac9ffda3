// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Manifest Loader: reads YAML (or, behind `legacy-widget`, XML) into a
//! canonical in-memory manifest, validating invariants and normalising
//! permissions and targets.
//!
//! Grounded on the teacher's `stone_recipe` crate (`serde_yaml`, untagged
//! enums for multi-shape fields) and `crates/yaml`'s role as a thin YAML
//! front-end.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

pub mod permissions;
#[cfg(feature = "legacy-widget")]
mod widget;

pub use permissions::{Declarations as PermissionDeclarations, Value as PermissionValue};

const ID_VERSION_CHARSET: fn(char) -> bool =
    |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';

#[derive(Debug, Error)]
pub enum Error {
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("legacy widget config.xml support is not compiled in")]
    NotSupported,

    #[error("rp-manifest must be \"1\"")]
    BadManifestVersion,

    #[error("id must be nonempty and match [A-Za-z0-9._-]+")]
    BadId,

    #[error("version must be nonempty and match [A-Za-z0-9._-]+")]
    BadVersion,

    #[error("target {0} is missing both `#target` and `target`")]
    MissingTargetName(usize),

    #[cfg(feature = "legacy-widget")]
    #[error("widget config.xml parse error: {0}")]
    Xml(#[from] quick_xml::DeError),
}

/// A runnable sub-unit of a manifest: a service, UI, or binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Derived from `#target`, falling back to `target`.
    pub name: String,
    pub content_src: String,
    pub content_type: String,
    pub required_permissions: PermissionDeclarations,
    pub required_configs: Vec<String>,
    /// Allocated by the Unit Emitter; absent until then.
    pub metatarget: Option<MetaTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaTarget {
    pub afid: u16,
    pub http_port: u16,
}

impl MetaTarget {
    pub fn new(afid: u16) -> Self {
        Self {
            afid,
            http_port: 29000 + afid,
        }
    }
}

/// A plug declaration: `name` is the exported relative path inside the
/// package, `value` is the importer package id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plug {
    pub name: String,
    pub value: String,
}

/// A `provided-bindings` declaration (classifier rule 3, `PublicLib`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedBinding {
    pub name: String,
    pub value: String,
}

/// Metadata attached by the orchestrator, threaded through to the Unit
/// Emitter so `AFMPKG_TRANSID`/`AFMPKG_REDPAKID` can be stamped into units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub transaction_id: Option<String>,
    pub redpak_id: Option<String>,
}

/// The canonical, validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub id: String,
    pub version: String,
    /// First two dotted components of `version`, lowercased.
    pub ver: String,
    /// `id` with dashes turned to underscores, lowercased.
    pub id_underscore: String,
    /// Typically equal to `id`.
    pub idaver: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub targets: Vec<Target>,
    pub plugs: Vec<Plug>,
    pub provided_bindings: Vec<ProvidedBinding>,
    /// `path -> property key` overrides; keys validated against the
    /// `PathType` property-key table at classification time (this crate
    /// does not depend on `pathtree`/`classifier`, so only charset-free
    /// well-formedness is checked here).
    pub file_properties: BTreeMap<String, String>,
    pub required_permissions: PermissionDeclarations,
    pub metadata: Metadata,
}

#[derive(Deserialize)]
struct RawContent {
    src: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RawTarget {
    #[serde(rename = "#target")]
    hash_target: Option<String>,
    target: Option<String>,
    content: RawContent,
    #[serde(default, rename = "required-permissions", deserialize_with = "permissions::canonical_opt")]
    required_permissions: PermissionDeclarations,
    #[serde(default, rename = "required-configs")]
    required_configs: Vec<String>,
}

#[derive(Deserialize)]
struct RawPlug {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(rename = "rp-manifest")]
    rp_manifest: serde_yaml::Value,
    id: String,
    version: String,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    targets: Vec<RawTarget>,
    #[serde(default)]
    plugs: Vec<RawPlug>,
    #[serde(default, rename = "provided-bindings")]
    provided_bindings: Vec<RawPlug>,
    #[serde(default, rename = "file-properties")]
    file_properties: BTreeMap<String, String>,
    #[serde(default, rename = "required-permissions", deserialize_with = "permissions::canonical_opt")]
    required_permissions: PermissionDeclarations,
}

fn is_manifest_version_one(value: &serde_yaml::Value) -> bool {
    matches!(value.as_str(), Some("1")) || matches!(value.as_i64(), Some(1))
}

fn derive_ver(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".").to_lowercase()
}

fn derive_id_underscore(id: &str) -> String {
    id.replace('-', "_").to_lowercase()
}

impl Manifest {
    /// Parse and validate a YAML manifest, in the check order spec.md §4.3
    /// lists.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, Error> {
        let raw: RawManifest = serde_yaml::from_slice(bytes)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawManifest) -> Result<Self, Error> {
        if !is_manifest_version_one(&raw.rp_manifest) {
            return Err(Error::BadManifestVersion);
        }
        if raw.id.is_empty() || !raw.id.chars().all(ID_VERSION_CHARSET) {
            return Err(Error::BadId);
        }
        if raw.version.is_empty() || !raw.version.chars().all(ID_VERSION_CHARSET) {
            return Err(Error::BadVersion);
        }

        let targets = raw
            .targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| {
                let name = target
                    .hash_target
                    .or(target.target)
                    .ok_or(Error::MissingTargetName(index))?;
                Ok(Target {
                    name,
                    content_src: target.content.src,
                    content_type: target.content.kind,
                    required_permissions: target.required_permissions,
                    required_configs: target.required_configs,
                    metatarget: None,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let plugs = raw
            .plugs
            .into_iter()
            .map(|p| Plug {
                name: p.name,
                value: p.value,
            })
            .collect();

        let provided_bindings = raw
            .provided_bindings
            .into_iter()
            .map(|p| ProvidedBinding {
                name: p.name,
                value: p.value,
            })
            .collect();

        let manifest = Manifest {
            ver: derive_ver(&raw.version),
            id_underscore: derive_id_underscore(&raw.id),
            idaver: raw.id.clone(),
            id: raw.id,
            version: raw.version,
            name: raw.name,
            description: raw.description,
            targets,
            plugs,
            provided_bindings,
            file_properties: raw.file_properties,
            required_permissions: raw.required_permissions,
            metadata: Metadata::default(),
        };

        Ok(manifest.normalise())
    }

    /// Recompute derived fields from `id`/`version`. Idempotent: derived
    /// fields are pure functions of the stored source fields.
    pub fn normalise(mut self) -> Self {
        self.ver = derive_ver(&self.version);
        self.id_underscore = derive_id_underscore(&self.id);
        self.idaver = self.id.clone();
        self
    }

    #[cfg(feature = "legacy-widget")]
    pub fn from_widget_config(bytes: &[u8]) -> Result<Self, Error> {
        widget::parse(bytes)
    }

    #[cfg(not(feature = "legacy-widget"))]
    pub fn from_widget_config(_bytes: &[u8]) -> Result<Self, Error> {
        Err(Error::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY: &str = r#"
rp-manifest: "1"
id: demo
version: "1.0"
targets:
  - target: main
    content:
      src: bin/run
      type: application/x-executable
"#;

    #[test]
    fn happy_manifest_parses() {
        let manifest = Manifest::from_yaml(HAPPY.as_bytes()).unwrap();
        assert_eq!(manifest.id, "demo");
        assert_eq!(manifest.ver, "1.0");
        assert_eq!(manifest.idaver, "demo");
        assert_eq!(manifest.targets.len(), 1);
        assert_eq!(manifest.targets[0].name, "main");
    }

    #[test]
    fn empty_id_is_bad_input() {
        let yaml = HAPPY.replace("id: demo", "id: \"\"");
        assert!(matches!(Manifest::from_yaml(yaml.as_bytes()), Err(Error::BadId)));
    }

    #[test]
    fn wrong_manifest_version_rejected() {
        let yaml = HAPPY.replace("rp-manifest: \"1\"", "rp-manifest: \"2\"");
        assert!(matches!(
            Manifest::from_yaml(yaml.as_bytes()),
            Err(Error::BadManifestVersion)
        ));
    }

    #[test]
    fn target_requires_name() {
        let yaml = HAPPY.replace("target: main", "other: main");
        assert!(matches!(
            Manifest::from_yaml(yaml.as_bytes()),
            Err(Error::MissingTargetName(0))
        ));
    }

    #[test]
    fn hash_target_preferred_over_target() {
        let yaml = HAPPY.replace("target: main", "target: main\n    \"#target\": preferred");
        let manifest = Manifest::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(manifest.targets[0].name, "preferred");
    }

    #[test]
    fn normalise_is_idempotent() {
        let manifest = Manifest::from_yaml(HAPPY.as_bytes()).unwrap();
        let once = manifest.clone().normalise();
        let twice = once.clone().normalise();
        assert_eq!(once, twice);
    }

    #[test]
    fn id_underscore_replaces_dashes() {
        let yaml = HAPPY.replace("id: demo", "id: my-app");
        let manifest = Manifest::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(manifest.id_underscore, "my_app");
    }

    #[test]
    #[cfg(not(feature = "legacy-widget"))]
    fn widget_config_unsupported_without_feature() {
        assert!(matches!(
            Manifest::from_widget_config(b"<widget/>"),
            Err(Error::NotSupported)
        ));
    }
}
