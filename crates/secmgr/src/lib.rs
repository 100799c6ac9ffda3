// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The security-manager collaborator surface: the five calls the orchestrator
//! makes into the SMACK/labelling backend, specified here only as a trait —
//! the backend itself is out of scope (spec.md §1).

use pathtree::PathType;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Install,
    Uninstall,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("security backend rejected the request: {0}")]
    Backend(String),
}

/// The five calls: `begin`, `tagfile`, `setperm`, `setunits`, `end`. An
/// uninstall is not a sixth call — it is `end` observed after a `begin`
/// that was opened with [`InstallMode::Uninstall`]; the backend routes
/// internally on that recorded mode.
pub trait SecurityManager {
    fn begin(&mut self, package: &str, mode: InstallMode) -> Result<(), Error>;
    fn tagfile(&mut self, path: &str, ptype: PathType) -> Result<(), Error>;
    fn setperm(&mut self, token: &str) -> Result<(), Error>;
    fn setunits(&mut self, units: &[units::Unit]) -> Result<(), Error>;
    fn end(&mut self, status: i32) -> Result<(), Error>;
}

/// `AFMPKG_TRANSID` / `AFMPKG_REDPAKID`, passed to a started target's
/// environment (spec.md §6).
pub fn environment(metadata: &manifest::Metadata) -> Vec<(&'static str, String)> {
    vec![
        ("AFMPKG_TRANSID", metadata.transaction_id.clone().unwrap_or_default()),
        ("AFMPKG_REDPAKID", metadata.redpak_id.clone().unwrap_or_default()),
    ]
}

/// The opaque token passed to `setperm` once the permission solver has run.
pub fn permission_token(all_required_granted: bool) -> &'static str {
    if all_required_granted {
        "urn:AGL:token:valid"
    } else {
        "urn:AGL:token:invalid"
    }
}
