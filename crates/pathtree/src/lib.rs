// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory tree of paths with per-node typed attributes, the sole shared
//! data structure for file enumeration, classification, and iteration.
//!
//! Ported from the teacher's `vfs::tree` arena (`indextree`-backed), cut
//! down to the single fixed node shape the core needs instead of a generic
//! `BlitFile` payload.

use std::io::BufRead;

use indextree::{Arena, NodeId};
use thiserror::Error;

mod path;
mod path_type;
mod variables;

pub use indextree::NodeId;
pub use path_type::PathType;
pub use variables::Variables;

bitflags::bitflags! {
    /// Walk policy for [`Tree::for_each`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WalkFlags: u8 {
        /// Skip implicit intermediate directories, visiting only nodes
        /// created by an explicit `add`.
        const ONLY_ADDED  = 0b0001;
        /// Visit a node before its children (pre-order). Mutually exclusive
        /// with `AFTER`; if neither is set, `AFTER` (post-order) applies.
        const BEFORE      = 0b0010;
        /// Visit a node after its children (post-order). This is the
        /// default when neither `BEFORE` nor `AFTER` is set.
        const AFTER       = 0b0100;
        /// Do not visit the root of the walk itself.
        const SILENT_ROOT = 0b1000;
        /// Do not maintain the path buffer (callback only needs the node).
        const NO_PATH     = 0b10000;
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("path not found: {0}")]
    NotFound(String),
}

struct Node {
    name: String,
    added: bool,
    leading_slash: bool,
    ptype: PathType,
    vars: Variables,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            added: false,
            leading_slash: false,
            ptype: PathType::Unset,
            vars: Variables::default(),
        }
    }
}

/// Arena-backed tree of path components. See the module docs.
pub struct Tree {
    arena: Arena<Node>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::create_root()
    }
}

impl Tree {
    /// Construct a new, empty tree. The root node has the empty name.
    pub fn create_root() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(Node::new(String::new()));
        Self { arena, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Split `path` on `/`, collapsing `//`, and walk/create nodes for each
    /// component, marking the leaf as explicitly added. Whether `path` had a
    /// leading slash is remembered on the leaf so reconstruction via
    /// [`Tree::path`] is lossless.
    pub fn add(&mut self, path: &str) -> NodeId {
        let leading_slash = path::had_leading_slash(path);
        let mut current = self.root;

        for component in path::components(path) {
            current = self.child_or_create(current, component);
        }

        let node = self.arena.get_mut(current).expect("node exists").get_mut();
        node.added = true;
        node.leading_slash = leading_slash;

        current
    }

    /// Resolve `path` to an existing node. Returns [`Error::NotFound`] if any
    /// segment along the way is missing.
    pub fn get(&self, path: &str) -> Result<NodeId, Error> {
        let mut current = self.root;

        for component in path::components(path) {
            current = self
                .find_child(current, component)
                .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        }

        Ok(current)
    }

    fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        parent
            .children(&self.arena)
            .find(|&child| self.arena[child].get().name == name)
    }

    fn child_or_create(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(existing) = self.find_child(parent, name) {
            return existing;
        }
        let child = self.arena.new_node(Node::new(name.to_owned()));
        parent.append(child, &mut self.arena);
        child
    }

    /// The path of `node`, reconstructed from the root. Prefixed with `/` iff
    /// `node` (or the node it was added as) had a leading slash at add-time.
    pub fn path(&self, node: NodeId) -> String {
        let leading_slash = self.arena[node].get().leading_slash;
        let rel = self.relpath(node, self.root);
        if leading_slash {
            format!("/{rel}")
        } else {
            rel
        }
    }

    /// The path of `node` relative to `root`, joined by `/`. Empty if
    /// `node == root`.
    pub fn relpath(&self, node: NodeId, root: NodeId) -> String {
        let mut segments = vec![];
        let mut current = node;
        while current != root {
            segments.push(self.arena[current].get().name.clone());
            current = match self.arena[current].parent() {
                Some(parent) => parent,
                None => break,
            };
        }
        segments.reverse();
        segments.join("/")
    }

    pub fn ptype(&self, node: NodeId) -> PathType {
        self.arena[node].get().ptype
    }

    pub fn set_ptype(&mut self, node: NodeId, ptype: PathType) {
        self.arena.get_mut(node).expect("node exists").get_mut().ptype = ptype;
    }

    pub fn is_added(&self, node: NodeId) -> bool {
        self.arena[node].get().added
    }

    pub fn name(&self, node: NodeId) -> &str {
        &self.arena[node].get().name
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena[node].parent()
    }

    pub fn var_set<T: std::any::Any>(
        &mut self,
        node: NodeId,
        key: &'static str,
        value: T,
        disposer: Option<Box<dyn FnOnce(Box<dyn std::any::Any>) + Send>>,
    ) {
        self.arena
            .get_mut(node)
            .expect("node exists")
            .get_mut()
            .vars
            .set(key, value, disposer);
    }

    pub fn var_get<T: std::any::Any>(&self, node: NodeId, key: &'static str) -> Option<&T> {
        self.arena[node].get().vars.get(key)
    }

    /// Destroy `node` and its subtree, invoking registered disposers on every
    /// variable still attached.
    pub fn remove(&mut self, node: NodeId) {
        node.remove_subtree(&mut self.arena);
    }

    /// Children of `node`, in ascending name order (siblings have no
    /// intrinsic order in the arena; this sorts at iteration time).
    fn sorted_children(&self, node: NodeId) -> Vec<NodeId> {
        let mut children: Vec<_> = node.children(&self.arena).collect();
        children.sort_by(|&a, &b| self.arena[a].get().name.cmp(&self.arena[b].get().name));
        children
    }

    /// Walk the subtree rooted at `root` per `flags`, invoking `visit` for
    /// each selected node. `visit` receives the node id and, unless
    /// `NO_PATH` is set, its path relative to `root`. Returning `Some(_)`
    /// aborts the walk; that value is propagated as the overall result.
    pub fn for_each<T>(
        &self,
        flags: WalkFlags,
        root: NodeId,
        visit: &mut impl FnMut(NodeId, Option<&str>) -> Option<T>,
    ) -> Option<T> {
        let mut buf = String::new();
        self.walk(flags, root, root, &mut buf, visit)
    }

    fn walk<T>(
        &self,
        flags: WalkFlags,
        root: NodeId,
        node: NodeId,
        buf: &mut String,
        visit: &mut impl FnMut(NodeId, Option<&str>) -> Option<T>,
    ) -> Option<T> {
        let is_root = node == root;
        let skip_this = is_root && flags.contains(WalkFlags::SILENT_ROOT);
        let skip_implicit = flags.contains(WalkFlags::ONLY_ADDED) && !self.is_added(node) && !is_root;
        let should_visit = !skip_this && !skip_implicit;

        let pre_order = flags.contains(WalkFlags::BEFORE);

        let reset_len = buf.len();
        if !is_root && !flags.contains(WalkFlags::NO_PATH) {
            if !buf.is_empty() {
                buf.push('/');
            }
            buf.push_str(&self.arena[node].get().name);
        }

        if pre_order && should_visit {
            let path = (!flags.contains(WalkFlags::NO_PATH)).then(|| buf.as_str());
            if let Some(result) = visit(node, path) {
                buf.truncate(reset_len);
                return Some(result);
            }
        }

        for child in self.sorted_children(node) {
            if let Some(result) = self.walk(flags, root, child, buf, visit) {
                buf.truncate(reset_len);
                return Some(result);
            }
        }

        if !pre_order && should_visit {
            let path = (!flags.contains(WalkFlags::NO_PATH)).then(|| buf.as_str());
            if let Some(result) = visit(node, path) {
                buf.truncate(reset_len);
                return Some(result);
            }
        }

        buf.truncate(reset_len);
        None
    }

    /// Read a newline-separated path list from `reader`, stopping on EOF or a
    /// literal `#STOP#` line, ignoring blank lines, leading whitespace, and
    /// `#`-prefixed comments. Each surviving line is [`Tree::add`]-ed.
    pub fn read_file_list(&mut self, reader: impl BufRead) -> std::io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim_start();
            if trimmed == "#STOP#" {
                break;
            }
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.add(trimmed);
        }
        Ok(())
    }

    /// All node ids added via [`Tree::add`] within `root`'s subtree, in
    /// ascending-by-path order (used by the signature verifier's canonical
    /// file list and the classifier's default pass).
    pub fn added_paths(&self, root: NodeId) -> Vec<(NodeId, String)> {
        let mut out = vec![];
        self.for_each::<()>(WalkFlags::ONLY_ADDED | WalkFlags::AFTER, root, &mut |node, path| {
            if let Some(path) = path {
                out.push((node, path.to_owned()));
            }
            None
        });
        out.sort_by(|a, b| a.1.cmp(&b.1));
        out
    }
}

pub use self::path::components as path_components;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get_round_trip() {
        let mut tree = Tree::create_root();
        let leaf = tree.add("/opt/pkg/demo/bin/run");
        assert_eq!(tree.get("/opt/pkg/demo/bin/run").unwrap(), leaf);
        assert_eq!(tree.path(leaf), "/opt/pkg/demo/bin/run");
    }

    #[test]
    fn get_missing_is_not_found() {
        let tree = Tree::create_root();
        assert!(matches!(tree.get("/a/b"), Err(Error::NotFound(_))));
    }

    #[test]
    fn only_added_after_order_matches_insertion_dedup() {
        let mut tree = Tree::create_root();
        tree.add("b/two");
        tree.add("a/one");
        tree.add("a/one"); // idempotent
        tree.add("a");

        let paths = tree
            .added_paths(tree.root())
            .into_iter()
            .map(|(_, p)| p)
            .collect::<Vec<_>>();

        assert_eq!(paths, vec!["a", "a/one", "b/two"]);
    }

    #[test]
    fn relpath_excludes_leading_slash_bit_of_root() {
        let mut tree = Tree::create_root();
        let pkg_root = tree.add("opt/pkg/demo");
        let file = tree.add("opt/pkg/demo/bin/run");
        assert_eq!(tree.relpath(file, pkg_root), "bin/run");
    }

    #[test]
    fn read_file_list_stops_at_sentinel_and_skips_comments() {
        let mut tree = Tree::create_root();
        let input = "# a comment\n\na/one\n  \n#STOP#\na/never\n";
        tree.read_file_list(input.as_bytes()).unwrap();
        assert!(tree.get("a/one").is_ok());
        assert!(tree.get("a/never").is_err());
    }

    #[test]
    fn var_disposer_runs_on_overwrite_and_destroy() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut tree = Tree::create_root();
        let node = tree.add("a");

        let disposed = Arc::new(AtomicUsize::new(0));
        let d1 = disposed.clone();
        tree.var_set(
            node,
            "afid",
            1u16,
            Some(Box::new(move |_| {
                d1.fetch_add(1, Ordering::SeqCst);
            })),
        );

        // Overwrite triggers the first disposer.
        tree.var_set(node, "afid", 2u16, None);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        let d2 = disposed.clone();
        tree.var_set(
            node,
            "afid",
            3u16,
            Some(Box::new(move |_| {
                d2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        tree.remove(node);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }
}
