// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The closed [`PathType`] enumeration, promoted to a first-class field on
//! tree nodes per the design note: other components (classifier, unit
//! emitter, security-manager sink) all key off it directly, so a `void*`
//! side-map would just be extra indirection.

/// Classification assigned to a single [`crate::Tree`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathType {
    /// Not yet classified.
    #[default]
    Unset,
    /// Classified, but matches no known rule or keyword.
    Unknown,
    /// Private configuration.
    Conf,
    /// Private data directory.
    Data,
    /// Private executable (gets `chmod 0755`).
    Exec,
    /// Served over HTTP by the framework.
    Http,
    /// Icon file, public-readable.
    Icon,
    /// Fallback private type for the package root and otherwise-plain files.
    Id,
    /// Private library.
    Lib,
    /// Exported to a named importer package.
    Plug,
    /// World-readable.
    Public,
    /// World-executable (gets `chmod 0755`).
    PublicExec,
    /// World-loadable library.
    PublicLib,
    /// Orphan content, outside of any detected package root.
    Default,
}

impl PathType {
    /// The `file-properties` override key table (`examples/original_source`
    /// `utils/path-type.c:filetypes[]`). Returns `None` for keys that name a
    /// derived-only type (`Unknown`, `Id`, `Icon`, `Default`) or an unknown
    /// string — both are rejected by the manifest loader as `BadInput`.
    pub fn from_property_key(key: &str) -> Option<Self> {
        Some(match key {
            "config" => PathType::Conf,
            "data" => PathType::Data,
            "executable" => PathType::Exec,
            "www" => PathType::Http,
            "library" => PathType::Lib,
            "plug" => PathType::Plug,
            "public" => PathType::Public,
            "public-executable" => PathType::PublicExec,
            "public-library" => PathType::PublicLib,
            _ => return None,
        })
    }

    /// The directory-name default table used by the classifier's default
    /// pass (`path_type_of_dirname`).
    pub fn from_dirname(name: &str) -> Option<Self> {
        Some(match name {
            "etc" => PathType::Conf,
            "bin" => PathType::Exec,
            "htdocs" => PathType::Http,
            "lib" => PathType::Lib,
            "public" => PathType::Public,
            _ => return None,
        })
    }

    /// `true` for the two types the classifier's DAC pass chmods to 0755.
    pub fn is_executable(self) -> bool {
        matches!(self, PathType::Exec | PathType::PublicExec)
    }

    /// `true` for the types that make an ancestor directory `Public`
    /// (classifier rule 7, "public propagation").
    pub fn propagates_public(self) -> bool {
        matches!(
            self,
            PathType::Plug | PathType::Public | PathType::PublicExec | PathType::PublicLib
        )
    }
}
