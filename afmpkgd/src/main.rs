// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgAction, Command};

fn command() -> Command {
    Command::new("afmpkgd")
        .about("Application framework package installer daemon")
        .arg(
            Arg::new("root")
                .short('D')
                .long("directory")
                .help("Root directory to search for configuration")
                .action(ArgAction::Set)
                .default_value("/"),
        )
        .arg(
            Arg::new("socket")
                .long("socket")
                .help("Override the request socket path (@name for abstract)")
                .action(ArgAction::Set),
        )
        .arg(Arg::new("strict").long("strict").help("Reject non-root peers").action(ArgAction::SetTrue))
        .arg(Arg::new("forever").long("forever").help("Never idle-shutdown").action(ArgAction::SetTrue))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity (repeatable)")
                .action(ArgAction::Count),
        )
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();
}

fn main() -> Result<std::process::ExitCode, afmpkgd::server::Error> {
    let matches = command().get_matches();

    init_logging(matches.get_count("verbose"));

    let root = matches.get_one::<String>("root").expect("has a default");
    let mut config = afmpkgd::config::load(root);
    if let Some(socket) = matches.get_one::<String>("socket") {
        config.socket_path = socket.clone();
    }
    if matches.get_flag("strict") {
        config.strict = true;
    }
    if matches.get_flag("forever") {
        config.forever = true;
    }

    let status = afmpkgd::server::run(config)?;
    Ok(std::process::ExitCode::from(status as u8))
}
