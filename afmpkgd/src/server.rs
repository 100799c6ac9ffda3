// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Server Loop: binds the request socket, polls for incoming connections
//! with a 5-minute timeout, and dispatches each to a detached worker thread
//! running the Request Protocol to completion.
//!
//! Grounded on `moss::signal` for ignoring `SIGPIPE`/`SIGHUP` for the
//! process lifetime, and on `examples/original_source`'s
//! `main-afmpkg-daemon.c` for the accept-then-detach shape (`listen_clients`
//! / `run` / `serve_thread`) — the poll-with-timeout idle-shutdown behavior
//! is new relative to that file, per spec.md §4.10's explicit design.

use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::sockopt::PeerCredentials;
use nix::sys::socket::{accept, bind, getsockopt, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};
use thiserror::Error;

use crate::config::Config;
use crate::orchestrator::{self, Collaborators, LoggingSecurityManager, RealFileSource, RunMode};

const POLL_TIMEOUT: Duration = Duration::from_secs(300);
const BACKLOG: usize = 10;

#[derive(Debug, Error)]
pub enum Error {
    #[error("socket error: {0}")]
    Socket(#[from] nix::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Binds `config.socket_path`, accepting both `@name` (abstract) and plain
/// filesystem paths, matching the client-facing URI convention of spec.md
/// §6.
fn bind_socket(path: &str) -> Result<OwnedFd, Error> {
    let addr = if let Some(name) = path.strip_prefix('@') {
        UnixAddr::new_abstract(name.as_bytes())?
    } else {
        let _ = std::fs::remove_file(path);
        UnixAddr::new(path)?
    };

    let fd = socket(AddressFamily::Unix, SockType::Stream, SockFlag::SOCK_CLOEXEC, None)?;
    bind(fd.as_raw_fd(), &addr)?;
    listen(&fd, Backlog::new(BACKLOG as i32).expect("backlog fits in i32"))?;
    Ok(fd)
}

/// `true` iff the connected peer's effective uid is 0, for `strict` mode.
fn peer_is_root(stream: &UnixStream) -> bool {
    match getsockopt(stream, PeerCredentials) {
        Ok(creds) => creds.uid() == 0,
        Err(err) => {
            log::warn!("could not read peer credentials: {err}");
            false
        }
    }
}

/// Reads lines off `stream` until EOF or the protocol request becomes
/// ready/errored, matching `afmpkg-server.c`'s `receive`: one request per
/// connection, read to completion, then reply once.
fn drive_protocol(stream: &mut UnixStream) -> protocol::Request {
    let mut request = protocol::Request::new();
    let reader = BufReader::new(stream.try_clone().expect("clone connected stream"));
    for line in reader.lines() {
        let Ok(line) = line else { break };
        request.add_line(&line);
        if request.is_ready() {
            break;
        }
    }
    request
}

/// Runs the orchestrator for a ready `ADD`/`REMOVE` request and reports the
/// Transaction Ledger's outcome.
fn handle_package_request(
    request: &protocol::Request,
    mode: RunMode,
    config: &Config,
    ledger: &ledger::Ledger,
    trust_anchors: &[x509_cert::Certificate],
) -> (protocol::State, Option<String>) {
    let files: Vec<String> = match &request.root {
        Some(root) => request.files.iter().map(|file| format!("{root}/{file}")).collect(),
        None => request.files.clone(),
    };

    let metadata = manifest::Metadata {
        transaction_id: request.transid.clone(),
        redpak_id: request.redpakid.clone(),
    };

    if let Some(transid) = &request.transid {
        let _ = ledger.get_or_create(transid, request.count);
    }

    let mut security = LoggingSecurityManager;
    let files_source = RealFileSource;
    let stat = classifier::RealFs;
    let result = orchestrator::run(
        mode,
        &files,
        metadata,
        &mut Collaborators {
            security: &mut security,
            files: &files_source,
            stat: &stat,
            policy: config,
            trust_anchors,
        },
    );

    if let Err(err) = &result {
        log::error!("orchestrator failed: {err}");
    }

    if let Some(transid) = &request.transid {
        match ledger.record(transid, result.is_ok()) {
            Ok(_) | Err(ledger::Error::NotFound(_)) => {}
        }
    }

    if result.is_ok() { (protocol::State::Ok, None) } else { (protocol::State::Error, None) }
}

fn handle_status_request(request: &protocol::Request, ledger: &ledger::Ledger) -> (protocol::State, Option<String>) {
    let Some(transid) = &request.transid else {
        return (protocol::State::Error, None);
    };
    match ledger.get_or_create(transid, 0) {
        Ok(txn) => {
            ledger.put(transid);
            (protocol::State::Ok, Some(format!("{} {} {}", txn.expected, txn.success, txn.fail)))
        }
        Err(_) => (protocol::State::Error, None),
    }
}

fn serve_connection(mut stream: UnixStream, config: &Config, ledger: &ledger::Ledger, trust_anchors: &[x509_cert::Certificate]) {
    if config.strict && !peer_is_root(&stream) {
        let _ = stream.write_all(protocol::reply(protocol::State::Error, Some("peer is not root")).as_bytes());
        return;
    }

    let mut request = drive_protocol(&mut stream);

    let (state, message) = match request.kind {
        protocol::Kind::AddPackage | protocol::Kind::CheckAddPackage if request.is_ready() => {
            handle_package_request(&request, RunMode::Install, config, ledger, trust_anchors)
        }
        protocol::Kind::RemovePackage | protocol::Kind::CheckRemovePackage if request.is_ready() => {
            handle_package_request(&request, RunMode::Uninstall, config, ledger, trust_anchors)
        }
        protocol::Kind::GetStatus if request.is_ready() => handle_status_request(&request, ledger),
        _ => {
            request.finish(false);
            (protocol::State::Error, request.error().map(|(_, msg)| msg.to_owned()))
        }
    };

    let line = protocol::reply(state, message.as_deref());
    if let Err(err) = stream.write_all(line.as_bytes()) {
        log::warn!("failed to send reply: {err}");
    }
}

/// Runs the accept loop until idle-shutdown triggers (unless
/// `config.forever`), returning the process exit code.
pub fn run(config: Config) -> Result<i32, Error> {
    let _signals = crate::signal::ignore([nix::sys::signal::Signal::SIGPIPE, nix::sys::signal::Signal::SIGHUP])
        .expect("install signal handlers");

    let trust_anchors = crate::config::load_trust_anchors(&config.trust_anchor_dir);
    let socket = bind_socket(&config.socket_path)?;
    let ledger = Arc::new(ledger::Ledger::with_ttl(Duration::from_secs(config.ledger_ttl_secs)));
    let live_workers = Arc::new(AtomicUsize::new(0));
    let config = Arc::new(config);
    let trust_anchors = Arc::new(trust_anchors);

    let timeout = PollTimeout::try_from(POLL_TIMEOUT).expect("5-minute timeout fits in a poll timeout");

    loop {
        let pollfd = PollFd::new(socket.as_fd(), PollFlags::POLLIN);
        let mut fds = [pollfd];
        let ready = poll(&mut fds, timeout)?;

        if ready > 0 {
            match accept(socket.as_raw_fd()) {
                Ok(client_fd) => {
                    let stream = unsafe { UnixStream::from_raw_fd(client_fd) };
                    let config = Arc::clone(&config);
                    let ledger = Arc::clone(&ledger);
                    let trust_anchors = Arc::clone(&trust_anchors);
                    let live_workers = Arc::clone(&live_workers);
                    live_workers.fetch_add(1, Ordering::SeqCst);
                    thread::spawn(move || {
                        let _guard = LiveWorkerGuard(&live_workers);
                        serve_connection(stream, &config, &ledger, &trust_anchors);
                    });
                }
                Err(err) => log::warn!("accept failed: {err}"),
            }
        }

        if !config.forever && live_workers.load(Ordering::SeqCst) == 0 && ledger.can_stop() {
            return Ok(0);
        }
    }
}

struct LiveWorkerGuard<'a>(&'a AtomicUsize);

impl Drop for LiveWorkerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
