// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Installer Orchestrator: drives one ADD/REMOVE request through detection,
//! manifest loading, signature verification, permission reconciliation,
//! classification, labelling, and unit emission.
//!
//! Grounded on `moss::client::install` for the "resolve → stage → apply,
//! bail with a typed `Error`, propagate via `?`" shape. The state order
//! named by the spec (`Detect → LoadManifest → CreatePermSet →
//! CheckPermissions → CheckContents → ClassifyFiles → SetupDAC →
//! SecurityBegin → LabelFiles → Permit → SetPlugs → EmitUnits →
//! SecurityEnd`) places `SecurityBegin` after the checks that can fail, but
//! the worked examples (spec.md §8, scenario 2: a signature failure is
//! followed by `end(<0)`, implying `begin` already ran) only make sense if
//! `begin` opens the bracket before those checks run. This implementation
//! follows the worked examples: `begin` moves to immediately after
//! `LoadManifest`, and every later step that fails closes the bracket with
//! `end(<0)` before returning — see DESIGN.md.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::fs::PermissionsExt;

use pathtree::{NodeId, PathType, Tree, WalkFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("manifest")]
    Manifest(#[from] manifest::Error),
    #[error("signature verification")]
    Sigverify(#[from] sigverify::Error),
    #[error("classification")]
    Classifier(#[from] classifier::Error),
    #[error("unit emission")]
    Units(#[from] units::Error),
    #[error("security manager")]
    Security(#[from] secmgr::Error),
    #[error("required permission {permission:?} was not granted for {package:?}")]
    PermissionDenied { package: String, permission: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    AfmPkg,
    Widget,
}

/// One detected package root and the subset of the request's file list that
/// belongs to it.
#[derive(Debug, Clone)]
pub struct PackageRoot {
    pub kind: Kind,
    pub root: String,
    pub files: Vec<String>,
}

/// Reconciles a manifest's declared permission names against policy. Kept
/// as a collaborator trait (like [`sigverify::FileSource`] and
/// [`classifier::PathStat`]) since the actual grant policy — cynara/SMACK
/// configuration — is out of scope (spec.md §1).
pub trait PermissionPolicy {
    fn is_granted(&self, name: &str) -> bool;
}

/// Bundles the external collaborators one orchestrator run needs.
pub struct Collaborators<'a> {
    pub security: &'a mut dyn secmgr::SecurityManager,
    pub files: &'a dyn sigverify::FileSource,
    pub stat: &'a dyn classifier::PathStat,
    pub policy: &'a dyn PermissionPolicy,
    pub trust_anchors: &'a [x509_cert::Certificate],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Install,
    Uninstall,
}

const MANIFEST_SUFFIX: &str = ".rpconfig/manifest.yml";
const WIDGET_SUFFIX: &str = "config.xml";
const SIGNATURE_PATH: &str = ".rpconfig/signature";
const ORPHAN_PACKAGE_NAME: &str = "orphan";

fn detect_kind_and_root(path: &str) -> Option<(Kind, String)> {
    if path == MANIFEST_SUFFIX {
        return Some((Kind::AfmPkg, String::new()));
    }
    if let Some(root) = path.strip_suffix(&format!("/{MANIFEST_SUFFIX}")) {
        return Some((Kind::AfmPkg, root.to_owned()));
    }
    if path == WIDGET_SUFFIX {
        return Some((Kind::Widget, String::new()));
    }
    if let Some(root) = path.strip_suffix(&format!("/{WIDGET_SUFFIX}")) {
        return Some((Kind::Widget, root.to_owned()));
    }
    None
}

fn package_depth(root: &str) -> usize {
    root.matches('/').count()
}

/// Scans `files` for package-identifying manifest paths (`.rpconfig/
/// manifest.yml`, `config.xml`), assigns every file to its most specific
/// containing root, and returns the packages in deepest-first processing
/// order plus any files claimed by no detected root.
pub fn detect_packages(files: &[String]) -> (Vec<PackageRoot>, Vec<String>) {
    let mut roots: BTreeMap<String, Kind> = BTreeMap::new();
    for file in files {
        if let Some((kind, root)) = detect_kind_and_root(file) {
            roots.insert(root, kind);
        }
    }

    let mut ordered: Vec<(String, Kind)> = roots.into_iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut packages: Vec<PackageRoot> =
        ordered.into_iter().map(|(root, kind)| PackageRoot { kind, root, files: Vec::new() }).collect();
    let mut orphans = Vec::new();

    'file: for file in files {
        for pkg in &mut packages {
            if pkg.root.is_empty() || *file == pkg.root || file.starts_with(&format!("{}/", pkg.root)) {
                pkg.files.push(file.clone());
                continue 'file;
            }
        }
        orphans.push(file.clone());
    }

    packages.sort_by(|a, b| package_depth(&b.root).cmp(&package_depth(&a.root)).then_with(|| b.root.cmp(&a.root)));

    (packages, orphans)
}

fn join_abs(root: &str, rel: &str) -> String {
    if rel.is_empty() {
        root.to_owned()
    } else if root.is_empty() {
        format!("/{rel}")
    } else {
        format!("{root}/{rel}")
    }
}

fn relative_path(root: &str, file: &str) -> String {
    if root.is_empty() {
        file.trim_start_matches('/').to_owned()
    } else {
        file.strip_prefix(root).unwrap_or(file).trim_start_matches('/').to_owned()
    }
}

fn manifest_path_for(pkg: &PackageRoot) -> String {
    match pkg.kind {
        Kind::AfmPkg => join_abs(&pkg.root, MANIFEST_SUFFIX),
        Kind::Widget => join_abs(&pkg.root, WIDGET_SUFFIX),
    }
}

/// `true` for paths that are orchestrator bookkeeping (the manifest file
/// itself, or its `.rpconfig` directory) rather than installed app content —
/// excluded from signing, tagging, and DAC passes.
fn is_bookkeeping(rel: &str, kind: Kind) -> bool {
    match kind {
        Kind::AfmPkg => rel == ".rpconfig" || rel.starts_with(".rpconfig/"),
        Kind::Widget => rel == WIDGET_SUFFIX,
    }
}

fn relative_tree(pkg: &PackageRoot) -> Tree {
    let mut tree = Tree::create_root();
    for file in &pkg.files {
        tree.add(&relative_path(&pkg.root, file));
    }
    tree
}

/// Same as [`relative_tree`] but excluding bookkeeping paths, for the
/// signature verifier's "no file in the tree is unreferenced" check — the
/// manifest and its own detached signature are never themselves part of
/// the signed content.
fn relative_tree_for_signing(pkg: &PackageRoot) -> Tree {
    let mut tree = Tree::create_root();
    for file in &pkg.files {
        let rel = relative_path(&pkg.root, file);
        if is_bookkeeping(&rel, pkg.kind) {
            continue;
        }
        tree.add(&rel);
    }
    tree
}

fn post_order_excluding_root(tree: &Tree) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    tree.for_each::<()>(WalkFlags::AFTER | WalkFlags::SILENT_ROOT | WalkFlags::NO_PATH, tree.root(), &mut |
        node,
        _,
    | {
        nodes.push(node);
        None
    });
    nodes
}

/// Adapts an absolute-path [`sigverify::FileSource`] to one that resolves
/// package-relative references against a package root.
struct Rooted<'a> {
    base: &'a dyn sigverify::FileSource,
    root: &'a str,
}

impl sigverify::FileSource for Rooted<'_> {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.base.read(&join_abs(self.root, path))
    }
}

fn load_manifest(pkg: &PackageRoot, files: &dyn sigverify::FileSource) -> Result<manifest::Manifest, Error> {
    let path = manifest_path_for(pkg);
    let bytes = files.read(&path)?;
    Ok(match pkg.kind {
        Kind::AfmPkg => manifest::Manifest::from_yaml(&bytes)?,
        Kind::Widget => manifest::Manifest::from_widget_config(&bytes)?,
    })
}

fn check_declarations(
    permset: &mut permset::PermissionSet,
    decls: &manifest::PermissionDeclarations,
    policy: &dyn PermissionPolicy,
) -> bool {
    let mut all_required_granted = true;
    for perm in decls.values() {
        if policy.is_granted(&perm.name) {
            permset.grant(&perm.name);
        }
        let satisfied = permset.request(&perm.name);
        match perm.value {
            manifest::PermissionValue::Required if !satisfied => {
                log::error!("ungranted permission required: {}", perm.name);
                all_required_granted = false;
            }
            manifest::PermissionValue::Required => log::debug!("granted permission: {}", perm.name),
            manifest::PermissionValue::Optional if satisfied => log::debug!("granted permission: {}", perm.name),
            manifest::PermissionValue::Optional => log::info!("optional permission ungranted: {}", perm.name),
        }
    }
    all_required_granted
}

fn check_permissions(
    permset: &mut permset::PermissionSet,
    manifest: &manifest::Manifest,
    policy: &dyn PermissionPolicy,
) -> bool {
    let mut ok = check_declarations(permset, &manifest.required_permissions, policy);
    for target in &manifest.targets {
        ok &= check_declarations(permset, &target.required_permissions, policy);
    }
    ok
}

fn verify_signature(
    pkg: &PackageRoot,
    files: &dyn sigverify::FileSource,
    trust_anchors: &[x509_cert::Certificate],
) -> Result<sigverify::AllowedDomain, Error> {
    let sig_path = join_abs(&pkg.root, SIGNATURE_PATH);
    let envelope = files.read(&sig_path)?;
    let tree = relative_tree_for_signing(pkg);
    let rooted = Rooted { base: files, root: &pkg.root };
    Ok(sigverify::check(&envelope, &tree, &rooted, trust_anchors)?)
}

fn apply_dac(tree: &Tree, root: &str) -> Result<(), Error> {
    for (node, rel) in tree.added_paths(tree.root()) {
        if !tree.ptype(node).is_executable() {
            continue;
        }
        let abs = join_abs(root, &rel);
        if let Ok(metadata) = std::fs::metadata(&abs) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&abs, perms)?;
        }
    }
    Ok(())
}

/// Tags every relevant node in `tree` with its current [`PathType`],
/// deepest-first so an importer sink can rely on children being labelled
/// before their parent, then the package root last. `selective` (install)
/// skips implicit nodes whose type doesn't propagate publicness — a plain
/// `bin` directory picking up `Exec` from the dirname table doesn't need
/// its own label, only the files under it do. Uninstall passes
/// `selective: false`: every node (but still never the `.rpconfig`
/// bookkeeping subtree) gets relabelled on the way out.
fn label_files(tree: &Tree, pkg: &PackageRoot, security: &mut dyn secmgr::SecurityManager, selective: bool) -> Result<(), Error> {
    for node in post_order_excluding_root(tree) {
        let rel = tree.relpath(node, tree.root());
        if is_bookkeeping(&rel, pkg.kind) {
            continue;
        }
        if selective && !(tree.is_added(node) || tree.ptype(node).propagates_public()) {
            continue;
        }
        let abs = join_abs(&pkg.root, &rel);
        security.tagfile(&abs, tree.ptype(node))?;
    }
    security.tagfile(&pkg.root, tree.ptype(tree.root()))?;
    Ok(())
}

fn install_package(
    pkg: &PackageRoot,
    metadata: &manifest::Metadata,
    afid_alloc: &mut units::AfidAllocator,
    collab: &mut Collaborators<'_>,
) -> Result<(), Error> {
    let mut manifest = load_manifest(pkg, collab.files)?;
    manifest.metadata = metadata.clone();

    collab.security.begin(&manifest.id, secmgr::InstallMode::Install)?;

    let mut permset = permset::PermissionSet::new();
    if !check_permissions(&mut permset, &manifest, collab.policy) {
        collab.security.end(-1)?;
        return Err(Error::PermissionDenied { package: manifest.id.clone(), permission: "required".into() });
    }

    if let Err(err) = verify_signature(pkg, collab.files, collab.trust_anchors) {
        collab.security.end(-1)?;
        return Err(err);
    }

    let mut tree = relative_tree(pkg);
    if let Err(err) = classifier::classify(&mut tree, &manifest, collab.stat) {
        collab.security.end(-1)?;
        return Err(err.into());
    }

    apply_dac(&tree, &pkg.root)?;

    label_files(&tree, pkg, collab.security, true)?;

    let token = secmgr::permission_token(true);
    collab.security.setperm(token)?;

    log::debug!("{} declares {} plug(s)", manifest.id, manifest.plugs.len());

    let unit_list = units::emit(&mut manifest, &manifest.metadata, afid_alloc, units::Mode::Install)?;
    collab.security.setunits(&unit_list)?;

    collab.security.end(0)?;
    Ok(())
}

fn uninstall_package(pkg: &PackageRoot, metadata: &manifest::Metadata, collab: &mut Collaborators<'_>) -> Result<(), Error> {
    let mut manifest = load_manifest(pkg, collab.files)?;
    manifest.metadata = metadata.clone();

    collab.security.begin(&manifest.id, secmgr::InstallMode::Uninstall)?;

    let mut allocator = units::AfidAllocator::new();
    let unit_list = units::emit(&mut manifest, &manifest.metadata, &mut allocator, units::Mode::Uninstall)?;
    collab.security.setunits(&unit_list)?;

    let mut tree = relative_tree(pkg);
    for node in post_order_excluding_root(&tree) {
        tree.set_ptype(node, PathType::Id);
    }
    tree.set_ptype(tree.root(), PathType::Id);

    label_files(&tree, pkg, collab.security, false)?;

    collab.security.end(0)?;
    Ok(())
}

fn process_orphans(orphans: &[String], mode: secmgr::InstallMode, security: &mut dyn secmgr::SecurityManager) -> Result<(), Error> {
    if orphans.is_empty() {
        return Ok(());
    }
    security.begin(ORPHAN_PACKAGE_NAME, mode)?;
    for file in orphans {
        security.tagfile(file, PathType::Default)?;
    }
    security.end(0)?;
    Ok(())
}

/// Drives every detected package in `files` (deepest-first), then hands
/// any orphaned files to a separate `Default`-labelled bracket.
pub fn run(mode: RunMode, files: &[String], metadata: manifest::Metadata, collab: &mut Collaborators<'_>) -> Result<(), Error> {
    let (packages, orphans) = detect_packages(files);
    let mut allocator = units::AfidAllocator::new();

    for pkg in &packages {
        match mode {
            RunMode::Install => install_package(pkg, &metadata, &mut allocator, collab)?,
            RunMode::Uninstall => uninstall_package(pkg, &metadata, collab)?,
        }
    }

    let sink_mode = match mode {
        RunMode::Install => secmgr::InstallMode::Install,
        RunMode::Uninstall => secmgr::InstallMode::Uninstall,
    };
    process_orphans(&orphans, sink_mode, collab.security)
}

/// [`sigverify::FileSource`] backed by the real filesystem, for use outside
/// of tests.
pub struct RealFileSource;

impl sigverify::FileSource for RealFileSource {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Logs every security-manager call instead of driving a real SMACK/cynara
/// backend, which is out of scope (spec.md §1).
pub struct LoggingSecurityManager;

impl secmgr::SecurityManager for LoggingSecurityManager {
    fn begin(&mut self, package: &str, mode: secmgr::InstallMode) -> Result<(), secmgr::Error> {
        log::info!("security: begin {package} ({mode:?})");
        Ok(())
    }

    fn tagfile(&mut self, path: &str, ptype: PathType) -> Result<(), secmgr::Error> {
        log::debug!("security: tagfile {path} -> {ptype:?}");
        Ok(())
    }

    fn setperm(&mut self, token: &str) -> Result<(), secmgr::Error> {
        log::debug!("security: setperm {token}");
        Ok(())
    }

    fn setunits(&mut self, units: &[units::Unit]) -> Result<(), secmgr::Error> {
        log::debug!("security: setunits ({} unit(s))", units.len());
        Ok(())
    }

    fn end(&mut self, status: i32) -> Result<(), secmgr::Error> {
        log::info!("security: end {status}");
        Ok(())
    }
}
