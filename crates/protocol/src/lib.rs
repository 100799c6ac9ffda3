// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Line-oriented receive→process→reply protocol for one client connection.
//!
//! Ported from `examples/original_source/src/afmpkg/afmpkg-request.c`: same
//! verb set, same `-1000..-1021` error codes and their exact trigger
//! conditions, re-expressed as a `State`/`Kind` state machine with a single
//! recorded first error instead of an early-return C function. The `-1016`
//! "out of memory" code from the original is part of the closed code space
//! this crate reproduces, but is never constructed here — `String`
//! allocation failure isn't a recoverable condition in this runtime.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Pending,
    Ready,
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kind {
    #[default]
    Unset,
    AddPackage,
    RemovePackage,
    CheckAddPackage,
    CheckRemovePackage,
    GetStatus,
}

fn operation_kind(value: &str) -> Kind {
    match value {
        "ADD" => Kind::AddPackage,
        "REMOVE" => Kind::RemovePackage,
        "CHECK_ADD" => Kind::CheckAddPackage,
        "CHECK_REMOVE" => Kind::CheckRemovePackage,
        _ => Kind::Unset,
    }
}

/// One accumulated request. `add_line` is fed successive protocol lines;
/// once `state` leaves `Pending`, further lines are drained without
/// changing the first recorded error (spec.md §7's "accumulates the first
/// error" propagation policy).
#[derive(Debug, Default)]
pub struct Request {
    pub state: State,
    pub kind: Kind,
    pub count: u32,
    pub index: u32,
    pub package: Option<String>,
    pub redpakid: Option<String>,
    pub root: Option<String>,
    pub transid: Option<String>,
    pub files: Vec<String>,
    error: Option<(i32, String)>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self) -> Option<(i32, &str)> {
        self.error.as_ref().map(|(code, msg)| (*code, msg.as_str()))
    }

    /// Feed one line (without its trailing `\n`). Returns the status code:
    /// `0` on success, or the negative code of the first error ever seen on
    /// this request (even if this particular line would otherwise have been
    /// fine — once in `Error`, the connection is just being drained).
    pub fn add_line(&mut self, line: &str) -> i32 {
        if self.state != State::Pending {
            if let Some((code, _)) = &self.error {
                return *code;
            }
            return self.fail(-1000, "line after end");
        }

        match self.process(line) {
            Ok(()) => 0,
            Err((code, msg)) => self.fail(code, msg),
        }
    }

    fn fail(&mut self, code: i32, msg: &'static str) -> i32 {
        self.state = State::Error;
        self.error.get_or_insert((code, msg.to_owned()));
        code
    }

    fn process(&mut self, line: &str) -> Result<(), (i32, &'static str)> {
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));

        match key {
            "BEGIN" => {
                if self.kind != Kind::Unset {
                    return Err((-1001, "unexpected BEGIN"));
                }
                self.kind = operation_kind(value);
                if self.kind == Kind::Unset {
                    return Err((-1002, "invalid BEGIN"));
                }
            }
            "COUNT" => {
                if self.count != 0 || self.kind == Kind::Unset {
                    return Err((-1003, "unexpected COUNT"));
                }
                let val: u32 = value.parse().map_err(|_| (-1004, "invalid COUNT"))?;
                if val < 1 {
                    return Err((-1005, "COUNT out of range"));
                }
                if self.index != 0 && val < self.index {
                    return Err((-1006, "COUNT out of INDEX"));
                }
                self.count = val;
            }
            "END" => {
                if self.kind != operation_kind(value) {
                    return Err((-1008, "invalid END"));
                }
                self.state = State::Ready;
            }
            "FILE" => {
                if self.kind == Kind::Unset {
                    return Err((-1009, "unexpected FILE"));
                }
                self.files.push(value.to_owned());
            }
            "INDEX" => {
                if self.index != 0 || self.kind == Kind::Unset {
                    return Err((-1011, "unexpected INDEX"));
                }
                let val: u32 = value.parse().map_err(|_| (-1012, "invalid INDEX"))?;
                if val < 1 {
                    return Err((-1013, "INDEX out of range"));
                }
                if self.count != 0 && val > self.count {
                    return Err((-1014, "INDEX out of COUNT"));
                }
                self.index = val;
            }
            "PACKAGE" => {
                if self.package.is_some() || self.kind == Kind::Unset {
                    return Err((-1015, "unexpected PACKAGE"));
                }
                self.package = Some(value.to_owned());
            }
            "REDPAKID" => {
                if self.redpakid.is_some() || self.kind == Kind::Unset {
                    return Err((-1017, "unexpected REDPAKID"));
                }
                self.redpakid = Some(value.to_owned());
            }
            "ROOT" => {
                if self.root.is_some() || self.kind == Kind::Unset {
                    return Err((-1018, "unexpected ROOT"));
                }
                self.root = Some(value.to_owned());
            }
            "TRANSID" => {
                if self.transid.is_some() || self.kind == Kind::Unset {
                    return Err((-1019, "unexpected TRANSID"));
                }
                self.transid = Some(value.to_owned());
            }
            "STATUS" => {
                if self.kind != Kind::Unset || self.transid.is_some() {
                    return Err((-1020, "unexpected STATUS"));
                }
                self.transid = Some(value.to_owned());
                self.kind = Kind::GetStatus;
                self.state = State::Ready;
            }
            _ => return Err((-1021, "bad line")),
        }

        Ok(())
    }

    /// `true` once the request is fully received (`END`/`STATUS` seen) and
    /// ready for the orchestrator or ledger to act on.
    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Mark the outcome after dispatch. Does nothing if a protocol error
    /// already won.
    pub fn finish(&mut self, success: bool) {
        if self.state == State::Ready {
            self.state = if success { State::Ok } else { State::Error };
        }
    }
}

/// Render the single reply line.
pub fn reply(state: State, message: Option<&str>) -> String {
    let verb = if state == State::Ok { "OK" } else { "ERROR" };
    match message {
        Some(msg) => format!("{verb} {msg}\n"),
        None => format!("{verb}\n"),
    }
}
