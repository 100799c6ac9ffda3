// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Path Classifier: the seven ordered rules that assign a [`PathType`] to
//! every node of a [`Tree`], grounded on the teacher's `boulder::package::
//! collect::Collector` (ordered rule matching over a path set, highest
//! priority checked last-declared-wins) adapted from glob-rule-to-package
//! matching to manifest-declaration-to-`PathType` matching.

use std::fs;

use pathtree::{NodeId, PathType, Tree, WalkFlags};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("manifest references path {0:?}, which is not present in the file tree")]
    UnknownPath(String),

    #[error("file-properties path {path:?} names an unknown property key {key:?}")]
    UnknownPropertyKey { path: String, key: String },

    #[error("file-properties conflict at {path:?}: already classified as {existing:?}, cannot also set {new:?}")]
    Conflict {
        path: String,
        existing: PathType,
        new: PathType,
    },
}

/// Tells the default pass (rule 6) whether a node is a directory. Decouples
/// classification from any particular filesystem; the real orchestrator
/// passes [`RealFs`], tests pass a fake.
pub trait PathStat {
    fn is_dir(&self, path: &str) -> bool;
}

/// [`PathStat`] backed by the real filesystem.
pub struct RealFs;

impl PathStat for RealFs {
    fn is_dir(&self, path: &str) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }
}

const EXECUTABLE_MIME_TYPES: &[&str] = &[
    "application/x-executable",
    "application/x-pie-executable",
    "application/x-sharedlib",
    "application/x-shellscript",
];

fn is_executable_mime(mime: &str) -> bool {
    EXECUTABLE_MIME_TYPES.contains(&mime)
}

fn collect_nodes(tree: &Tree, flags: WalkFlags) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    tree.for_each::<()>(flags | WalkFlags::NO_PATH, tree.root(), &mut |node, _| {
        nodes.push(node);
        None
    });
    nodes
}

/// Run all seven classifier rules over `tree` in place, per the manifest's
/// plugs, provided bindings, file-properties overrides, and targets.
pub fn classify(tree: &mut Tree, manifest: &manifest::Manifest, stat: &dyn PathStat) -> Result<(), Error> {
    let root = tree.root();

    // Rule 1: reset.
    let pre_order = collect_nodes(tree, WalkFlags::BEFORE);
    for &node in &pre_order {
        tree.set_ptype(node, PathType::Unset);
    }
    tree.set_ptype(root, PathType::Id);

    // Rule 2: plugs.
    for plug in &manifest.plugs {
        let node = tree.get(&plug.name).map_err(|_| Error::UnknownPath(plug.name.clone()))?;
        tree.set_ptype(node, PathType::Plug);
    }

    // Rule 3: provided bindings.
    for binding in &manifest.provided_bindings {
        let node = tree
            .get(&binding.name)
            .map_err(|_| Error::UnknownPath(binding.name.clone()))?;
        tree.set_ptype(node, PathType::PublicLib);
    }

    // Rule 4: file-properties overrides.
    for (path, key) in &manifest.file_properties {
        let ptype = PathType::from_property_key(key).ok_or_else(|| Error::UnknownPropertyKey {
            path: path.clone(),
            key: key.clone(),
        })?;
        let node = tree.get(path).map_err(|_| Error::UnknownPath(path.clone()))?;
        let existing = tree.ptype(node);
        if existing != PathType::Unset && existing != ptype {
            return Err(Error::Conflict {
                path: path.clone(),
                existing,
                new: ptype,
            });
        }
        tree.set_ptype(node, ptype);
    }

    // Rule 5: executable targets.
    for target in &manifest.targets {
        if let Ok(node) = tree.get(&target.content_src) {
            if tree.ptype(node) == PathType::Unset && is_executable_mime(&target.content_type) {
                tree.set_ptype(node, PathType::Exec);
            }
        }
    }

    // Rule 6: default pass, pre-order (parents resolved before children).
    for &node in &pre_order {
        if node == root || tree.ptype(node) != PathType::Unset {
            continue;
        }
        let path = tree.path(node);
        let name = tree.name(node).to_owned();
        let parent = tree.parent(node).expect("non-root node has a parent");
        let parent_type = tree.ptype(parent);

        let resolved = if stat.is_dir(&path) {
            PathType::from_dirname(&name).unwrap_or(parent_type)
        } else {
            parent_type
        };
        tree.set_ptype(node, resolved);
    }

    // Rule 7: public propagation, post-order (children resolved before parents).
    let post_order = collect_nodes(tree, WalkFlags::AFTER);
    for &node in &post_order {
        if !tree.ptype(node).propagates_public() {
            continue;
        }
        let Some(parent) = tree.parent(node) else {
            continue;
        };
        let parent_type = tree.ptype(parent);
        if parent_type == PathType::Public {
            continue;
        }
        let upgraded = if parent_type == PathType::Unset {
            PathType::Plug
        } else {
            PathType::Public
        };
        tree.set_ptype(parent, upgraded);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifest::Manifest;

    struct FakeFs {
        dirs: Vec<&'static str>,
    }

    impl PathStat for FakeFs {
        fn is_dir(&self, path: &str) -> bool {
            self.dirs.contains(&path)
        }
    }

    fn demo_manifest() -> Manifest {
        Manifest::from_yaml(
            br#"
rp-manifest: "1"
id: demo
version: "1.0"
targets:
  - target: main
    content:
      src: opt/pkg/demo/bin/run
      type: application/x-executable
"#,
        )
        .unwrap()
    }

    #[test]
    fn root_gets_id_and_executable_target_gets_exec() {
        let mut tree = Tree::create_root();
        tree.add("opt/pkg/demo/bin/run");
        tree.add("opt/pkg/demo/etc/config.conf");
        let manifest = demo_manifest();
        let fs = FakeFs {
            dirs: vec!["opt", "opt/pkg", "opt/pkg/demo", "opt/pkg/demo/bin", "opt/pkg/demo/etc"],
        };

        classify(&mut tree, &manifest, &fs).unwrap();

        assert_eq!(tree.ptype(tree.root()), PathType::Id);
        let run = tree.get("opt/pkg/demo/bin/run").unwrap();
        assert_eq!(tree.ptype(run), PathType::Exec);
    }

    #[test]
    fn etc_keyword_directory_sets_conf_and_inherits_to_children() {
        let mut tree = Tree::create_root();
        tree.add("opt/pkg/demo/etc/app.conf");
        let manifest = demo_manifest();
        let fs = FakeFs {
            dirs: vec!["opt", "opt/pkg", "opt/pkg/demo", "opt/pkg/demo/etc"],
        };

        classify(&mut tree, &manifest, &fs).unwrap();

        let etc = tree.get("opt/pkg/demo/etc").unwrap();
        let conf_file = tree.get("opt/pkg/demo/etc/app.conf").unwrap();
        assert_eq!(tree.ptype(etc), PathType::Conf);
        assert_eq!(tree.ptype(conf_file), PathType::Conf);
    }

    #[test]
    fn plug_propagates_public_to_ancestors() {
        let mut tree = Tree::create_root();
        let mut manifest = demo_manifest();
        tree.add("opt/pkg/demo/plugs/shared-thing");
        manifest.plugs.push(manifest::Plug {
            name: "opt/pkg/demo/plugs/shared-thing".into(),
            value: "other-pkg".into(),
        });
        let fs = FakeFs {
            dirs: vec!["opt", "opt/pkg", "opt/pkg/demo", "opt/pkg/demo/plugs"],
        };

        classify(&mut tree, &manifest, &fs).unwrap();

        let plug_node = tree.get("opt/pkg/demo/plugs/shared-thing").unwrap();
        let plugs_dir = tree.get("opt/pkg/demo/plugs").unwrap();
        assert_eq!(tree.ptype(plug_node), PathType::Plug);
        assert_eq!(tree.ptype(plugs_dir), PathType::Public);
    }

    #[test]
    fn file_properties_conflict_is_rejected() {
        let mut tree = Tree::create_root();
        let mut manifest = demo_manifest();
        tree.add("opt/pkg/demo/plugs/shared-thing");
        manifest.plugs.push(manifest::Plug {
            name: "opt/pkg/demo/plugs/shared-thing".into(),
            value: "other-pkg".into(),
        });
        manifest
            .file_properties
            .insert("opt/pkg/demo/plugs/shared-thing".into(), "config".into());
        let fs = FakeFs { dirs: vec![] };

        let err = classify(&mut tree, &manifest, &fs).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn unknown_property_key_is_rejected() {
        let mut tree = Tree::create_root();
        let mut manifest = demo_manifest();
        tree.add("opt/pkg/demo/bin/run");
        manifest
            .file_properties
            .insert("opt/pkg/demo/bin/run".into(), "bogus".into());
        let fs = FakeFs { dirs: vec![] };

        let err = classify(&mut tree, &manifest, &fs).unwrap_err();
        assert!(matches!(err, Error::UnknownPropertyKey { .. }));
    }
}
