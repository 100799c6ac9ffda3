// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end scenarios against `afmpkgd::orchestrator`, `afmpkgd::config`,
//! and `ledger::Ledger` together, the way a real request would thread
//! through them. Scenarios that require a successful signature check are
//! not covered here: a genuine RSA certificate chain needs CA tooling this
//! exercise can't build-and-verify without running the toolchain (see
//! DESIGN.md). What a bad or missing signature does to the bracket
//! (`begin` then `end(<0)`, nothing past it) is covered instead.

use std::collections::HashMap;
use std::io;

use afmpkgd::orchestrator::{self, Collaborators, PermissionPolicy, RunMode};
use pathtree::PathType;

struct RecordingSecurity {
    calls: Vec<String>,
}

impl secmgr::SecurityManager for RecordingSecurity {
    fn begin(&mut self, package: &str, mode: secmgr::InstallMode) -> Result<(), secmgr::Error> {
        self.calls.push(format!("begin({package}, {mode:?})"));
        Ok(())
    }
    fn tagfile(&mut self, path: &str, ptype: PathType) -> Result<(), secmgr::Error> {
        self.calls.push(format!("tagfile({path}, {ptype:?})"));
        Ok(())
    }
    fn setperm(&mut self, token: &str) -> Result<(), secmgr::Error> {
        self.calls.push(format!("setperm({token})"));
        Ok(())
    }
    fn setunits(&mut self, units: &[units::Unit]) -> Result<(), secmgr::Error> {
        self.calls.push(format!("setunits({} units)", units.len()));
        Ok(())
    }
    fn end(&mut self, status: i32) -> Result<(), secmgr::Error> {
        self.calls.push(format!("end({status})"));
        Ok(())
    }
}

struct MemoryFiles(HashMap<String, Vec<u8>>);

impl sigverify::FileSource for MemoryFiles {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.0.get(path).cloned().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_owned()))
    }
}

struct AlwaysFile;
impl classifier::PathStat for AlwaysFile {
    fn is_dir(&self, _path: &str) -> bool {
        false
    }
}

struct GrantAll;
impl PermissionPolicy for GrantAll {
    fn is_granted(&self, _name: &str) -> bool {
        true
    }
}

fn minimal_manifest(id: &str) -> Vec<u8> {
    format!("rp-manifest: \"1\"\nid: {id}\nversion: \"1.0\"\n").into_bytes()
}

/// Scenario: uninstall relabels every node `Id` and tags them unconditionally
/// (no selectivity, unlike install), after emitting the uninstall units
/// first — matching spec.md §8's swapped call order for teardown.
#[test]
fn uninstall_round_trip_relabels_every_node_and_closes_cleanly() {
    let mut files = HashMap::new();
    files.insert("/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(), minimal_manifest("demo"));
    let files = MemoryFiles(files);

    let mut security = RecordingSecurity { calls: Vec::new() };
    let stat = AlwaysFile;
    let policy = GrantAll;
    let anchors: Vec<x509_cert::Certificate> = Vec::new();

    let request_files = vec![
        "/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(),
        "/opt/pkg/demo/bin/run".to_owned(),
        "/opt/pkg/demo/public/icon.png".to_owned(),
    ];

    let metadata = manifest::Metadata { transaction_id: Some("txn-9".to_owned()), redpak_id: None };
    let mut collab =
        Collaborators { security: &mut security, files: &files, stat: &stat, policy: &policy, trust_anchors: &anchors };

    orchestrator::run(RunMode::Uninstall, &request_files, metadata, &mut collab).unwrap();

    assert_eq!(security.calls[0], "begin(demo, Uninstall)");
    assert!(security.calls.contains(&"setunits(0 units)".to_owned()));
    // every non-bookkeeping node gets tagged Id, children before the root
    assert!(security.calls.contains(&"tagfile(/opt/pkg/demo/bin/run, Id)".to_owned()));
    assert!(security.calls.contains(&"tagfile(/opt/pkg/demo/bin, Id)".to_owned()));
    assert!(security.calls.contains(&"tagfile(/opt/pkg/demo/public/icon.png, Id)".to_owned()));
    assert!(security.calls.contains(&"tagfile(/opt/pkg/demo, Id)".to_owned()));
    assert!(!security.calls.iter().any(|c| c.contains(".rpconfig")));
    assert_eq!(security.calls.last(), Some(&"end(0)".to_owned()));
}

/// Scenario: two nested package roots in one request are processed deepest
/// root first, each under its own `begin`/`end` bracket.
#[test]
fn nested_packages_each_get_their_own_bracket_deepest_first() {
    let mut files = HashMap::new();
    files.insert("/opt/pkg/outer/.rpconfig/manifest.yml".to_owned(), minimal_manifest("outer"));
    files.insert("/opt/pkg/outer/inner/.rpconfig/manifest.yml".to_owned(), minimal_manifest("inner"));
    let files = MemoryFiles(files);

    let mut security = RecordingSecurity { calls: Vec::new() };
    let stat = AlwaysFile;
    let policy = GrantAll;
    let anchors: Vec<x509_cert::Certificate> = Vec::new();

    let request_files = vec![
        "/opt/pkg/outer/.rpconfig/manifest.yml".to_owned(),
        "/opt/pkg/outer/inner/.rpconfig/manifest.yml".to_owned(),
    ];

    let mut collab =
        Collaborators { security: &mut security, files: &files, stat: &stat, policy: &policy, trust_anchors: &anchors };

    orchestrator::run(RunMode::Uninstall, &request_files, manifest::Metadata::default(), &mut collab).unwrap();

    let begins: Vec<&String> = security.calls.iter().filter(|c| c.starts_with("begin")).collect();
    assert_eq!(begins, vec!["begin(inner, Uninstall)", "begin(outer, Uninstall)"]);
}

/// Scenario: files that belong to no detected package root get a single
/// shared `Default`-labelled bracket of their own.
#[test]
fn orphaned_files_get_a_default_bracket_alongside_a_real_package() {
    let mut files = HashMap::new();
    files.insert("/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(), minimal_manifest("demo"));
    let files = MemoryFiles(files);

    let mut security = RecordingSecurity { calls: Vec::new() };
    let stat = AlwaysFile;
    let policy = GrantAll;
    let anchors: Vec<x509_cert::Certificate> = Vec::new();

    let request_files =
        vec!["/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(), "/opt/stray/leftover.conf".to_owned()];

    let mut collab =
        Collaborators { security: &mut security, files: &files, stat: &stat, policy: &policy, trust_anchors: &anchors };

    orchestrator::run(RunMode::Uninstall, &request_files, manifest::Metadata::default(), &mut collab).unwrap();

    assert!(security.calls.contains(&"begin(orphan, Uninstall)".to_owned()));
    assert!(security.calls.contains(&"tagfile(/opt/stray/leftover.conf, Default)".to_owned()));
}

/// Scenario: a permission the manifest requires but the platform hasn't
/// granted fails the install before any file is ever touched.
#[test]
fn ungranted_required_permission_fails_before_classification() {
    let manifest_yaml = br#"
rp-manifest: "1"
id: demo
version: "1.0"
required-permissions:
  urn:AGL:camera: required
"#;
    let mut files = HashMap::new();
    files.insert("/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(), manifest_yaml.to_vec());
    let files = MemoryFiles(files);

    struct GrantNothing;
    impl PermissionPolicy for GrantNothing {
        fn is_granted(&self, _name: &str) -> bool {
            false
        }
    }

    let mut security = RecordingSecurity { calls: Vec::new() };
    let stat = AlwaysFile;
    let policy = GrantNothing;
    let anchors: Vec<x509_cert::Certificate> = Vec::new();

    let request_files = vec!["/opt/pkg/demo/.rpconfig/manifest.yml".to_owned()];
    let mut collab =
        Collaborators { security: &mut security, files: &files, stat: &stat, policy: &policy, trust_anchors: &anchors };

    let err = orchestrator::run(RunMode::Install, &request_files, manifest::Metadata::default(), &mut collab)
        .unwrap_err();

    assert!(matches!(err, orchestrator::Error::PermissionDenied { .. }));
    assert_eq!(security.calls, vec!["begin(demo, Install)".to_owned(), "end(-1)".to_owned()]);
}

/// Scenario: a malformed signature envelope closes the bracket with
/// `end(<0)` without ever reaching classification or labelling, matching
/// the "no call past begin except end" shape of a rogue/unreferenced file.
#[test]
fn corrupt_signature_envelope_ends_the_bracket_without_labelling() {
    let mut files = HashMap::new();
    files.insert("/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(), minimal_manifest("demo"));
    files.insert("/opt/pkg/demo/.rpconfig/signature".to_owned(), b"not a real envelope".to_vec());
    files.insert("/opt/pkg/demo/bin/run".to_owned(), b"#!/bin/sh\n".to_vec());
    let files = MemoryFiles(files);

    let mut security = RecordingSecurity { calls: Vec::new() };
    let stat = AlwaysFile;
    let policy = GrantAll;
    let anchors: Vec<x509_cert::Certificate> = Vec::new();

    let request_files =
        vec!["/opt/pkg/demo/.rpconfig/manifest.yml".to_owned(), "/opt/pkg/demo/bin/run".to_owned()];
    let mut collab =
        Collaborators { security: &mut security, files: &files, stat: &stat, policy: &policy, trust_anchors: &anchors };

    let err = orchestrator::run(RunMode::Install, &request_files, manifest::Metadata::default(), &mut collab)
        .unwrap_err();

    assert!(matches!(err, orchestrator::Error::Sigverify(_)));
    assert_eq!(security.calls, vec!["begin(demo, Install)".to_owned(), "end(-1)".to_owned()]);
}

/// The Transaction Ledger and Installer Orchestrator are independent
/// collaborators the Server Loop wires together per request; this
/// exercises the same "create expected count, record each outcome, query
/// status, then evict" sequence `afmpkgd::server` drives.
#[test]
fn ledger_tracks_a_multi_package_transaction_across_requests() {
    let ledger = ledger::Ledger::new();
    ledger.get_or_create("txn-77", 2).unwrap();

    ledger.record("txn-77", true).unwrap();
    let after_first = ledger.get_or_create("txn-77", 0).unwrap();
    assert_eq!((after_first.expected, after_first.success, after_first.fail), (2, 1, 0));

    ledger.record("txn-77", false).unwrap();
    let after_second = ledger.get_or_create("txn-77", 0).unwrap();
    assert_eq!((after_second.expected, after_second.success, after_second.fail), (2, 1, 1));

    assert!(!ledger.can_stop());
    ledger.put("txn-77");
    assert!(ledger.can_stop());
    assert!(matches!(ledger.get_or_create("txn-77", 0), Err(ledger::Error::NotFound(_))));
}

/// `Config` is the `PermissionPolicy` the real server wires in; confirms
/// the trait impl actually consults `granted_permissions` rather than
/// always allowing or denying.
#[test]
fn config_permission_policy_only_grants_listed_permissions() {
    let mut config = afmpkgd::config::Config::default();
    config.granted_permissions.push("urn:AGL:camera".to_owned());

    assert!(config.is_granted("urn:AGL:camera"));
    assert!(!config.is_granted("urn:AGL:microphone"));
}
