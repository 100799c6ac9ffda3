// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Unit Emitter: expands a manifest, once classified and given an allocated
//! AFID per target, into the ordered `(scope, type, name, content)`
//! descriptors the security-manager sink's `setunits` call expects.

use manifest::{Manifest, MetaTarget, Metadata, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    Service,
    Socket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub scope: Scope,
    pub unit_type: UnitType,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Install,
    /// Units are generated with fake `afid=0, port=0` so the sink can locate
    /// and remove them by name (spec.md §4.7).
    Uninstall,
}

/// Sequential AFID allocator. Starts at 1; 0 is reserved for uninstall's
/// fake metatargets.
#[derive(Debug, Default)]
pub struct AfidAllocator {
    next: u16,
}

impl AfidAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> Result<u16, Error> {
        let afid = self.next;
        self.next = self.next.checked_add(1).ok_or(Error::AfidExhausted)?;
        Ok(afid)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("afid allocator exhausted")]
    AfidExhausted,
}

fn is_web_content(target: &Target) -> bool {
    target.content_type.contains("html") || target.content_type.starts_with("text/")
}

fn service_unit_name(manifest: &Manifest, target: &Target) -> String {
    format!("{}@{}.service", manifest.id, target.name)
}

fn socket_unit_name(manifest: &Manifest, target: &Target) -> String {
    format!("{}@{}.socket", manifest.id, target.name)
}

fn service_content(manifest: &Manifest, target: &Target, metatarget: MetaTarget, metadata: &Metadata) -> String {
    format!(
        "[Unit]\n\
         Description={id} - {target}\n\
         \n\
         [Service]\n\
         ExecStart={src}\n\
         Environment=AFMPKG_TRANSID={transid}\n\
         Environment=AFMPKG_REDPAKID={redpakid}\n\
         Environment=AFM_APP_HTTP_PORT={port}\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        id = manifest.id,
        target = target.name,
        src = target.content_src,
        transid = metadata.transaction_id.as_deref().unwrap_or(""),
        redpakid = metadata.redpak_id.as_deref().unwrap_or(""),
        port = metatarget.http_port,
    )
}

fn socket_content(metatarget: MetaTarget) -> String {
    format!(
        "[Socket]\n\
         ListenStream={port}\n\
         \n\
         [Install]\n\
         WantedBy=sockets.target\n",
        port = metatarget.http_port,
    )
}

/// Allocate an AFID for each target (or the fake `0` for [`Mode::Uninstall`])
/// and emit its unit descriptors, in target declaration order.
pub fn emit(
    manifest: &mut Manifest,
    metadata: &Metadata,
    allocator: &mut AfidAllocator,
    mode: Mode,
) -> Result<Vec<Unit>, Error> {
    let mut units = Vec::new();

    for target in &mut manifest.targets {
        let afid = match mode {
            Mode::Install => allocator.allocate()?,
            Mode::Uninstall => 0,
        };
        let metatarget = MetaTarget::new(afid);
        target.metatarget = Some(metatarget);

        units.push(Unit {
            scope: Scope::System,
            unit_type: UnitType::Service,
            name: service_unit_name(manifest, target),
            content: service_content(manifest, target, metatarget, metadata),
        });

        if is_web_content(target) {
            units.push(Unit {
                scope: Scope::System,
                unit_type: UnitType::Socket,
                name: socket_unit_name(manifest, target),
                content: socket_content(metatarget),
            });
        }
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_manifest() -> Manifest {
        Manifest::from_yaml(
            br#"
rp-manifest: "1"
id: demo
version: "1.0"
targets:
  - target: main
    content:
      src: bin/run
      type: application/x-executable
  - target: ui
    content:
      src: index.html
      type: text/html
"#,
        )
        .unwrap()
    }

    #[test]
    fn non_web_target_gets_only_a_service_unit() {
        let mut manifest = demo_manifest();
        let mut allocator = AfidAllocator::new();
        let units = emit(&mut manifest, &Metadata::default(), &mut allocator, Mode::Install).unwrap();

        let main_units: Vec<_> = units.iter().filter(|u| u.name.contains("@main")).collect();
        assert_eq!(main_units.len(), 1);
        assert_eq!(main_units[0].unit_type, UnitType::Service);
    }

    #[test]
    fn web_target_gets_service_and_socket() {
        let mut manifest = demo_manifest();
        let mut allocator = AfidAllocator::new();
        let units = emit(&mut manifest, &Metadata::default(), &mut allocator, Mode::Install).unwrap();

        let ui_units: Vec<_> = units.iter().filter(|u| u.name.contains("@ui")).collect();
        assert_eq!(ui_units.len(), 2);
    }

    #[test]
    fn afids_are_sequential_and_ports_derive_from_them() {
        let mut manifest = demo_manifest();
        let mut allocator = AfidAllocator::new();
        emit(&mut manifest, &Metadata::default(), &mut allocator, Mode::Install).unwrap();

        let first = manifest.targets[0].metatarget.unwrap();
        let second = manifest.targets[1].metatarget.unwrap();
        assert_eq!(first.afid, 1);
        assert_eq!(second.afid, 2);
        assert_eq!(first.http_port, 29001);
        assert_eq!(second.http_port, 29002);
    }

    #[test]
    fn uninstall_mode_uses_fake_zero_afid() {
        let mut manifest = demo_manifest();
        let mut allocator = AfidAllocator::new();
        emit(&mut manifest, &Metadata::default(), &mut allocator, Mode::Uninstall).unwrap();

        assert_eq!(manifest.targets[0].metatarget.unwrap().afid, 0);
        assert_eq!(manifest.targets[0].metatarget.unwrap().http_port, 29000);
    }
}
