//! Run one command against a remote agent.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ipcbridge_operator::{dispatch::Request, hex, Client};
use ipcbridge_protocol::{BufferAttr, ServiceHandle, ServiceName};
use ipcbridge_stream::Config;
use std::{
    net::{SocketAddr, TcpStream},
    process::ExitCode,
};
use tracing::{error, info, Level};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

const DEFAULT_CONNECT: &str = "127.0.0.1:7890";
const DEFAULT_MTU: &str = "3584";

const PEEK_CMD: &str = "peek";
const POKE_CMD: &str = "poke";
const SERVICE_CMD: &str = "service";
const CALL_CMD: &str = "call";

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn address_arg() -> Arg {
    Arg::new("address")
        .long("address")
        .required(true)
        .help("Target address (decimal or 0x-prefixed hex)")
        .value_parser(hex::parse_u64)
}

fn name_arg() -> Arg {
    Arg::new("name")
        .long("name")
        .required(true)
        .help("Service name (at most 8 bytes)")
}

fn domain_arg() -> Arg {
    Arg::new("domain")
        .long("domain")
        .help("Convert the session into a domain first")
        .action(ArgAction::SetTrue)
}

fn open(client: &mut Client<TcpStream>, matches: &ArgMatches) -> Result<ServiceHandle> {
    let name = matches
        .get_one::<String>("name")
        .ok_or("missing service name")?;
    let handle = client.get_service(ServiceName::new(name)?)?;
    info!(%name, ?handle, "opened service");
    if !matches.get_flag("domain") {
        return Ok(handle);
    }
    let handle = client.convert_service_to_domain(handle)?;
    info!(?handle, "converted to domain");
    Ok(handle)
}

fn run(client: &mut Client<TcpStream>, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some((PEEK_CMD, matches)) => {
            let address = *matches.get_one::<u64>("address").ok_or("missing address")?;
            let size = *matches.get_one::<u64>("size").ok_or("missing size")?;
            let data = client.read(address, size)?;
            println!("{}", hex::encode(&data));
        }
        Some((POKE_CMD, matches)) => {
            let address = *matches.get_one::<u64>("address").ok_or("missing address")?;
            let data = matches.get_one::<String>("data").ok_or("missing data")?;
            let data = hex::decode(data).ok_or("data is not valid hex")?;
            client.write(address, &data)?;
            info!(address, len = data.len(), "wrote region");
        }
        Some((SERVICE_CMD, matches)) => {
            let handle = open(client, matches)?;
            println!(
                "session={} own_handle={} object_id={} pointer_buffer_size={:#x}",
                handle.session, handle.own_handle, handle.object_id, handle.pointer_buffer_size
            );
            client.close_service(handle)?;
        }
        Some((CALL_CMD, matches)) => {
            let handle = open(client, matches)?;
            let request_id = *matches
                .get_one::<u32>("request-id")
                .ok_or("missing request id")?;
            let input = match matches.get_one::<String>("input") {
                Some(input) => hex::decode(input).ok_or("input is not valid hex")?,
                None => Vec::new(),
            };
            let mut request = Request::new(&handle, request_id).input(input);
            if let Some(out_size) = matches.get_one::<u32>("out-size") {
                request = request.out_size(*out_size);
            }
            for size in matches.get_many::<u64>("out-buffer").unwrap_or_default() {
                request = request.inline_out(BufferAttr::empty(), *size);
            }
            let response = client.dispatch(&request);
            drop(request);
            client.close_service(handle)?;

            let response = response?;
            println!("output={}", hex::encode(&response.output));
            for (index, object) in response.objects.iter().enumerate() {
                println!("object[{index}]={object:?}");
            }
            for (index, buffer) in response.buffers.iter().enumerate() {
                println!("buffer[{index}]={}", hex::encode(buffer));
            }
        }
        _ => return Err("no command given".into()),
    }
    Ok(())
}

fn main() -> ExitCode {
    let matches = Command::new("ipcbridge")
        .version(crate_version())
        .about("Drive a remote agent's heap, services and generic calls.")
        .arg(
            Arg::new("connect")
                .long("connect")
                .default_value(DEFAULT_CONNECT)
                .help("Address of the agent")
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
        .subcommand(
            Command::new(PEEK_CMD)
                .about("Print a region of target memory as hex.")
                .arg(address_arg())
                .arg(
                    Arg::new("size")
                        .long("size")
                        .required(true)
                        .help("Number of bytes to read")
                        .value_parser(hex::parse_u64),
                ),
        )
        .subcommand(
            Command::new(POKE_CMD)
                .about("Write hex-encoded bytes into target memory.")
                .arg(address_arg())
                .arg(
                    Arg::new("data")
                        .long("data")
                        .required(true)
                        .help("Bytes to write, hex encoded"),
                ),
        )
        .subcommand(
            Command::new(SERVICE_CMD)
                .about("Open a service, print its handle and close it.")
                .arg(name_arg())
                .arg(domain_arg()),
        )
        .subcommand(
            Command::new(CALL_CMD)
                .about("Open a service, run one generic call against it and close it.")
                .arg(name_arg())
                .arg(domain_arg())
                .arg(
                    Arg::new("request-id")
                        .long("request-id")
                        .required(true)
                        .help("Command id understood by the service")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("input")
                        .long("input")
                        .help("Input payload, hex encoded"),
                )
                .arg(
                    Arg::new("out-size")
                        .long("out-size")
                        .help("Size of the output payload")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("out-buffer")
                        .long("out-buffer")
                        .help("Size of an inline output buffer (repeatable)")
                        .action(ArgAction::Append)
                        .value_parser(hex::parse_u64),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = Config::default();
    if let Some(mtu) = matches.get_one::<usize>("mtu") {
        config.max_transfer_unit = *mtu;
    }
    let Some(address) = matches.get_one::<SocketAddr>("connect").copied() else {
        error!("missing agent address");
        return ExitCode::FAILURE;
    };
    let stream = match TcpStream::connect(address) {
        Ok(stream) => stream,
        Err(err) => {
            error!(?err, %address, "unable to connect");
            return ExitCode::FAILURE;
        }
    };
    let mut client = Client::new(stream, config);

    let result = run(&mut client, &matches);
    if let Err(err) = client.exit() {
        error!(?err, "unable to end session");
        return ExitCode::FAILURE;
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "command failed");
            ExitCode::FAILURE
        }
    }
}
