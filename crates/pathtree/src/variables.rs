// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Open-ended per-node variable map, used to attach transient state (AFID
//! stash, "explicitly plugged" markers, ...) that isn't part of the fixed
//! node schema. See the design note in the root crate docs: promoted from a
//! `void*`-keyed store only because more than one collaborator needs it.

use std::any::Any;
use std::collections::HashMap;

type Disposer = Box<dyn FnOnce(Box<dyn Any>) + Send>;

#[derive(Default)]
pub struct Variables {
    entries: HashMap<&'static str, (Box<dyn Any>, Option<Disposer>)>,
}

impl Variables {
    pub fn set<T: Any>(&mut self, key: &'static str, value: T, disposer: Option<Disposer>) {
        let previous = self.entries.insert(key, (Box::new(value), disposer));
        if let Some((old_value, Some(old_disposer))) = previous {
            old_disposer(old_value);
        }
    }

    pub fn get<T: Any>(&self, key: &'static str) -> Option<&T> {
        self.entries.get(key).and_then(|(value, _)| value.downcast_ref())
    }

    pub fn dispose_all(&mut self) {
        for (_, (value, disposer)) in self.entries.drain() {
            if let Some(disposer) = disposer {
                disposer(value);
            }
        }
    }
}

impl Drop for Variables {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
