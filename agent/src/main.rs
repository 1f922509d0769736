//! Serve a single operator over TCP.

use clap::{value_parser, Arg, ArgAction, Command};
use ipcbridge_agent::{heap::Native, simulated, Config, Server};
use ipcbridge_protocol::ServiceName;
use std::{
    net::{SocketAddr, TcpListener},
    process::ExitCode,
};
use tracing::{error, info, Level};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

const DEFAULT_LISTEN: &str = "127.0.0.1:7890";
const DEFAULT_MTU: &str = "3584";

fn main() -> ExitCode {
    let matches = Command::new("ipcbridge-agent")
        .version(crate_version())
        .about("Serve remote heap, service and dispatch commands for one operator.")
        .arg(
            Arg::new("listen")
                .long("listen")
                .default_value(DEFAULT_LISTEN)
                .help("Address to accept the operator connection on")
                .value_parser(value_parser!(SocketAddr)),
        )
        .arg(
            Arg::new("mtu")
                .long("mtu")
                .default_value(DEFAULT_MTU)
                .help("Maximum bytes moved by a single transport read or write")
                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("Most verbose log level to emit")
                .value_parser(value_parser!(Level)),
        )
        .arg(
            Arg::new("services")
                .help("Service names registered with the simulated platform")
                .action(ArgAction::Append)
                .num_args(0..),
        )
        .get_matches();

    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut platform = simulated::Platform::default();
    for name in matches
        .get_many::<String>("services")
        .unwrap_or_default()
    {
        match ServiceName::new(name) {
            Ok(service) => platform.register(service),
            Err(err) => {
                error!(?err, %name, "invalid service name");
                return ExitCode::FAILURE;
            }
        }
    }

    let mut config = Config::default();
    if let Some(mtu) = matches.get_one::<usize>("mtu") {
        config.channel.max_transfer_unit = *mtu;
    }
    let Some(address) = matches.get_one::<SocketAddr>("listen").copied() else {
        error!("missing listen address");
        return ExitCode::FAILURE;
    };

    let listener = match TcpListener::bind(address) {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, %address, "unable to listen");
            return ExitCode::FAILURE;
        }
    };
    info!(%address, "waiting for operator");
    let stream = match listener.accept() {
        Ok((stream, peer)) => {
            info!(%peer, "operator connected");
            stream
        }
        Err(err) => {
            error!(?err, "unable to accept operator");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = stream.set_nodelay(true) {
        error!(?err, "unable to disable nagle");
        return ExitCode::FAILURE;
    }

    let mut server = Server::new(stream, Native, platform, config);
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(?err, "session failed");
            ExitCode::FAILURE
        }
    }
}
