// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Daemon configuration, loaded from vendor (`/usr/share/afmpkgd/*.yaml`)
//! then admin (`/etc/afmpkgd/*.yaml`) search paths and merged admin-over-
//! vendor, in the shape of the teacher's `moss::config` loader.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DOMAIN: &str = "afmpkgd";
const EXTENSION: &str = "yaml";

fn default_socket_path() -> String {
    "@afmpkg-daemon.socket".to_owned()
}

fn default_ledger_ttl_secs() -> u64 {
    3600
}

fn default_trust_anchor_dir() -> PathBuf {
    PathBuf::from("/etc/afmpkgd/trust-anchors")
}

/// Daemon-wide settings, mergeable so an admin override file can supersede
/// a subset of vendor-supplied fields.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_ledger_ttl_secs")]
    pub ledger_ttl_secs: u64,
    #[serde(default = "default_trust_anchor_dir")]
    pub trust_anchor_dir: PathBuf,
    #[serde(default)]
    pub forever: bool,
    /// Permission URIs the local policy grants outright, independent of
    /// what a package requests. Stands in for the cynara/SMACK policy
    /// database the real security manager would consult (out of scope).
    #[serde(default)]
    pub granted_permissions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            strict: false,
            ledger_ttl_secs: default_ledger_ttl_secs(),
            trust_anchor_dir: default_trust_anchor_dir(),
            forever: false,
            granted_permissions: Vec::new(),
        }
    }
}

impl Config {
    /// Merge `other` over `self`: every field `other` sets non-default wins.
    /// Booleans and the TTL favour `other` unconditionally, matching the
    /// "later file in the search order wins" semantics of the teacher's
    /// loader (admin after vendor). `granted_permissions` accumulates
    /// instead of replacing, so an admin drop-in can add to the vendor
    /// grant list without repeating it.
    fn merge(self, other: Self) -> Self {
        let mut granted_permissions = self.granted_permissions;
        granted_permissions.extend(other.granted_permissions);
        Self { granted_permissions, ..other }
    }
}

impl crate::orchestrator::PermissionPolicy for Config {
    fn is_granted(&self, name: &str) -> bool {
        self.granted_permissions.iter().any(|granted| granted == name)
    }
}

#[derive(Clone, Copy)]
enum Base {
    Vendor,
    Admin,
}

impl Base {
    fn path(self) -> &'static str {
        match self {
            Base::Vendor => "usr/share",
            Base::Admin => "etc",
        }
    }
}

enum Search {
    File,
    Directory,
}

fn domain_file(root: impl AsRef<Path>, base: Base) -> PathBuf {
    root.as_ref().join(base.path()).join(DOMAIN).join(format!("config.{EXTENSION}"))
}

fn domain_dir(root: impl AsRef<Path>, base: Base) -> PathBuf {
    root.as_ref().join(base.path()).join(DOMAIN).join(format!("config.{EXTENSION}.d"))
}

fn enumerate_paths(search: Search, root: impl AsRef<Path>, base: Base) -> Vec<PathBuf> {
    match search {
        Search::File => {
            let file = domain_file(&root, base);
            if file.exists() {
                vec![file]
            } else {
                vec![]
            }
        }
        Search::Directory => fs::read_dir(domain_dir(&root, base))
            .map(|entries| {
                entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(EXTENSION))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn read_config(path: PathBuf) -> Option<Config> {
    let file = File::open(path).ok()?;
    serde_yaml::from_reader(file).ok()
}

/// Load and merge every config found under `root` (vendor file, vendor
/// directory, admin file, admin directory, in that order), falling back to
/// [`Config::default`] if nothing is found.
pub fn load(root: impl AsRef<Path>) -> Config {
    [
        (Base::Vendor, Search::File),
        (Base::Vendor, Search::Directory),
        (Base::Admin, Search::File),
        (Base::Admin, Search::Directory),
    ]
    .into_iter()
    .flat_map(|(base, search)| enumerate_paths(search, &root, base))
    .filter_map(read_config)
    .fold(Config::default(), Config::merge)
}

/// Reads every `.pem` file in `dir` as a trust-anchor certificate. Missing
/// or unreadable entries are logged and skipped rather than failing the
/// whole load, since a bad anchor file shouldn't take the daemon down.
pub fn load_trust_anchors(dir: impl AsRef<Path>) -> Vec<x509_cert::Certificate> {
    use der::DecodePem;

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("trust anchor directory {:?} unreadable: {err}", dir.as_ref());
            return Vec::new();
        }
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("pem"))
        .filter_map(|path| match fs::read(&path).map(|bytes| x509_cert::Certificate::from_pem(&bytes)) {
            Ok(Ok(cert)) => Some(cert),
            Ok(Err(err)) => {
                log::warn!("trust anchor {path:?} is not a valid certificate: {err}");
                None
            }
            Err(err) => {
                log::warn!("trust anchor {path:?} unreadable: {err}");
                None
            }
        })
        .collect()
}
