// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Growable requested/granted permission table.
//!
//! Ported from `examples/original_source/src/utils/permset.c`: a flat,
//! insertion-ordered array of `(name, requested, granted)` triples plus a
//! selection cursor, rather than a `HashMap` — selection-mode iteration
//! needs a stable cursor over entries in insertion order, which a hash map
//! doesn't give for free.

const SEPARATORS: [char; 5] = [' ', '\t', '\n', '\r', ','];

/// Selector for [`PermissionSet::select_first`] / [`PermissionSet::select_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    Any,
    Requested,
    Granted,
    RequestedAndGranted,
}

/// Selector for [`PermissionSet::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reset {
    Nothing,
    Requested,
    Granted,
    RequestedAndGranted,
}

#[derive(Debug, Clone)]
struct Permission {
    name: String,
    requested: bool,
    granted: bool,
}

/// A growable array of `(name, requested, granted)` triples. No duplicates;
/// `grant`/`request` are idempotent and independent of each other.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
    cursor: usize,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.permissions.iter().position(|p| p.name == name)
    }

    fn find_or_insert(&mut self, name: &str) -> usize {
        if let Some(index) = self.find(name) {
            return index;
        }
        self.permissions.push(Permission {
            name: name.to_owned(),
            requested: false,
            granted: false,
        });
        self.permissions.len() - 1
    }

    /// Add `name` if needed and mark it requested. Returns `true` iff the
    /// resulting entry is both requested and granted.
    pub fn request(&mut self, name: &str) -> bool {
        let index = self.find_or_insert(name);
        self.permissions[index].requested = true;
        self.permissions[index].granted && self.permissions[index].requested
    }

    /// Add `name` if needed and mark it granted. Returns `true` iff the
    /// resulting entry is both requested and granted.
    pub fn grant(&mut self, name: &str) -> bool {
        let index = self.find_or_insert(name);
        self.permissions[index].granted = true;
        self.permissions[index].granted && self.permissions[index].requested
    }

    /// Add `name` without requesting or granting it (a bare reference, used
    /// when a manifest declares a permission name without a value yet).
    pub fn add(&mut self, name: &str) {
        self.find_or_insert(name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Parse `list` on whitespace/comma and apply `op` to every token,
    /// returning the logical AND of the per-token results. An empty or
    /// all-whitespace list is vacuously `true`.
    fn apply_list(&mut self, list: &str, mut op: impl FnMut(&mut Self, &str) -> bool) -> bool {
        list.split(SEPARATORS)
            .filter(|token| !token.is_empty())
            .fold(true, |allowed, token| allowed & op(self, token))
    }

    pub fn request_list(&mut self, list: &str) -> bool {
        self.apply_list(list, Self::request)
    }

    pub fn grant_list(&mut self, list: &str) -> bool {
        self.apply_list(list, Self::grant)
    }

    pub fn add_list(&mut self, list: &str) -> bool {
        for token in list.split(SEPARATORS).filter(|token| !token.is_empty()) {
            self.add(token);
        }
        true
    }

    /// Clear the chosen flag(s) on every entry without removing entries.
    pub fn reset(&mut self, mode: Reset) {
        for permission in &mut self.permissions {
            match mode {
                Reset::Nothing => {}
                Reset::Requested => permission.requested = false,
                Reset::Granted => permission.granted = false,
                Reset::RequestedAndGranted => {
                    permission.requested = false;
                    permission.granted = false;
                }
            }
        }
    }

    fn matches(permission: &Permission, mode: Select) -> bool {
        match mode {
            Select::Any => true,
            Select::Requested => permission.requested,
            Select::Granted => permission.granted,
            Select::RequestedAndGranted => permission.requested && permission.granted,
        }
    }

    fn advance(&mut self, mode: Select) -> bool {
        while self.cursor < self.permissions.len() && !Self::matches(&self.permissions[self.cursor], mode) {
            self.cursor += 1;
        }
        self.cursor < self.permissions.len()
    }

    pub fn select_first(&mut self, mode: Select) -> bool {
        self.cursor = 0;
        self.advance(mode)
    }

    pub fn select_next(&mut self, mode: Select) -> bool {
        self.cursor += 1;
        self.advance(mode)
    }

    pub fn current(&self) -> Option<&str> {
        self.permissions.get(self.cursor).map(|p| p.name.as_str())
    }

    pub fn is_current_requested(&self) -> bool {
        self.permissions.get(self.cursor).is_some_and(|p| p.requested)
    }

    pub fn is_current_granted(&self) -> bool {
        self.permissions.get(self.cursor).is_some_and(|p| p.granted)
    }

    /// Iterate entries matching `mode` in insertion order, without disturbing
    /// the selection cursor.
    pub fn iter(&self, mode: Select) -> impl Iterator<Item = &str> {
        self.permissions
            .iter()
            .filter(move |p| Self::matches(p, mode))
            .map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_grant_is_requested_and_granted() {
        let mut set = PermissionSet::new();
        assert!(!set.request("urn:x"));
        assert!(set.grant("urn:x"));

        assert!(set.select_first(Select::RequestedAndGranted));
        assert_eq!(set.current(), Some("urn:x"));
    }

    #[test]
    fn reset_requested_keeps_granted() {
        let mut set = PermissionSet::new();
        set.request("a");
        set.grant("a");
        set.reset(Reset::Requested);
        assert!(!set.is_empty());
        assert!(set.select_first(Select::Granted));
        assert!(!set.is_current_requested());
        assert!(set.is_current_granted());
    }

    #[test]
    fn list_parses_whitespace_tab_newline_comma() {
        let mut set = PermissionSet::new();
        assert!(set.request_list("a, b\tc\nd"));
        for name in ["a", "b", "c", "d"] {
            assert!(set.has(name));
        }
    }

    #[test]
    fn grant_and_request_are_idempotent_and_independent() {
        let mut set = PermissionSet::new();
        set.grant("a");
        set.grant("a");
        assert!(set.request("a")); // already granted, now also requested
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_list_is_vacuously_allowed() {
        let mut set = PermissionSet::new();
        assert!(set.request_list("   "));
    }
}
