// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Canonicalisation of permission declarations.
//!
//! The manifest format accepts four distinct shapes for a permission
//! declaration block. Per the design note, this is expressed as a sum type
//! over the shapes plus a single canonicalisation fold — the same pattern
//! the teacher's `stone_recipe::KeyValue<Tuning>` deserializer uses for its
//! own multi-shape tuning declarations (`Outer::Key` / `Outer::KeyValue`
//! untagged enum, folded to one canonical shape).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Required,
    Optional,
}

impl Value {
    pub fn as_str(self) -> &'static str {
        match self {
            Value::Required => "required",
            Value::Optional => "optional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub name: String,
    pub value: Value,
}

/// Canonical `{name: {name, value}}` permission table.
pub type Declarations = BTreeMap<String, Permission>;

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawValue {
    Required,
    Optional,
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Required => Value::Required,
            RawValue::Optional => Value::Optional,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    /// An array entry that is just a name: `- foo.bar`.
    Name(String),
    /// An array entry that is a full object: `- {name: foo.bar, value: optional}`.
    Full { name: String, value: RawValue },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMapValue {
    /// `foo.bar: optional`
    Bare(RawValue),
    /// `foo.bar: {value: optional}`
    Full { value: RawValue },
}

/// The four accepted shapes of a permission declaration block.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeclarations {
    /// A lone string: the whole block is one required permission.
    Single(String),
    /// An array of strings and/or `{name, value}` objects.
    List(Vec<RawEntry>),
    /// A `{name: value-or-object}` mapping.
    Map(BTreeMap<String, RawMapValue>),
}

fn insert(decls: &mut Declarations, name: String, value: Value) {
    decls.insert(name.clone(), Permission { name, value });
}

impl RawDeclarations {
    fn canonicalise(self) -> Declarations {
        let mut decls = Declarations::new();
        match self {
            RawDeclarations::Single(name) => insert(&mut decls, name, Value::Required),
            RawDeclarations::List(entries) => {
                for entry in entries {
                    match entry {
                        RawEntry::Name(name) => insert(&mut decls, name, Value::Required),
                        RawEntry::Full { name, value } => insert(&mut decls, name, value.into()),
                    }
                }
            }
            RawDeclarations::Map(map) => {
                for (name, value) in map {
                    let value = match value {
                        RawMapValue::Bare(v) => v.into(),
                        RawMapValue::Full { value } => value.into(),
                    };
                    insert(&mut decls, name, value);
                }
            }
        }
        decls
    }
}

/// `#[serde(deserialize_with = "permissions::canonical")]` entry point:
/// accepts any of the four shapes and folds to the canonical map.
pub fn canonical<'de, D>(deserializer: D) -> Result<Declarations, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawDeclarations::deserialize(deserializer)?.canonicalise())
}

/// Same as [`canonical`], but for an optional/missing field (defaults to
/// an empty table).
pub fn canonical_opt<'de, D>(deserializer: D) -> Result<Declarations, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDeclarations>::deserialize(deserializer)? {
        Some(raw) => Ok(raw.canonicalise()),
        None => Ok(Declarations::new()),
    }
}
