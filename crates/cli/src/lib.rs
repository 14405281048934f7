#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_cli` is the client front end: it parses the flag set, installs the
//! logging subscriber, builds the runtime and drives one transfer. Exit
//! codes: 0 on success, 2 for configuration mistakes (including flag
//! parsing), 1 for everything that failed after configuration.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use qft_transfer::{Client, ClientOptions, TransferError, WriteMode};
use qft_transport::ClientTrust;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn command() -> Command {
    Command::new("qft")
        .about("Fetches one file from a qft server over parallel QUIC streams.")
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .default_value("127.0.0.1")
                .help("Server host; also the TLS server name."),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .default_value("1234")
                .help("Server UDP port."),
        )
        .arg(
            Arg::new("cli-port")
                .long("cli-port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .default_value("1235")
                .help("Local UDP port to dial from; 0 lets the OS pick."),
        )
        .arg(
            Arg::new("filename")
                .long("filename")
                .value_name("NAME")
                .default_value("dummyfile")
                .help("Basename of the file to fetch."),
        )
        .arg(
            Arg::new("src-folder")
                .long("src-folder")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Directory holding the file on the server. Defaults to $HOME."),
        )
        .arg(
            Arg::new("dst-folder")
                .long("dst-folder")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Local directory to write into. Defaults to the working directory."),
        )
        .arg(
            Arg::new("streams")
                .long("streams")
                .value_name("N")
                .value_parser(clap::value_parser!(u8))
                .default_value("1")
                .help("Data streams to request, 1..=100."),
        )
        .arg(
            Arg::new("insecure")
                .long("insecure")
                .action(ArgAction::SetTrue)
                .help("Skip server certificate verification. Testing only."),
        )
        .arg(
            Arg::new("check-md5")
                .long("check-md5")
                .action(ArgAction::SetTrue)
                .help("Verify the received file against the server's digest sidecar."),
        )
        .arg(
            Arg::new("ca")
                .long("ca")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .conflicts_with("insecure")
                .help("PEM root-CA bundle used to verify the server certificate."),
        )
        .arg(
            Arg::new("mmap")
                .long("mmap")
                .action(ArgAction::SetTrue)
                .help("Write through a memory-mapped destination instead of pwrites."),
        )
        .arg(
            Arg::new("writers")
                .long("writers")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .default_value("4")
                .help("Copy tasks for the memory-mapped write path."),
        )
}

struct Invocation {
    options: ClientOptions,
    src_folder: PathBuf,
    filename: String,
    dst_folder: PathBuf,
}

fn parse(matches: &clap::ArgMatches) -> Result<Invocation, TransferError> {
    let trust = if let Some(ca) = matches.get_one::<PathBuf>("ca") {
        ClientTrust::CaFile(ca.clone())
    } else if matches.get_flag("insecure") {
        ClientTrust::Insecure
    } else {
        return Err(TransferError::Config(
            "server verification needs --ca <bundle>, or --insecure for testing".to_owned(),
        ));
    };

    let src_folder = matches
        .get_one::<PathBuf>("src-folder")
        .cloned()
        .or_else(|| env::var_os("HOME").map(PathBuf::from))
        .ok_or_else(|| {
            TransferError::Config("no --src-folder given and $HOME is unset".to_owned())
        })?;
    let dst_folder = match matches.get_one::<PathBuf>("dst-folder") {
        Some(dir) => dir.clone(),
        None => env::current_dir()
            .map_err(|err| TransferError::Config(format!("working directory: {err}")))?,
    };

    let options = ClientOptions {
        host: matches
            .get_one::<String>("host")
            .cloned()
            .unwrap_or_default(),
        port: matches.get_one::<u16>("port").copied().unwrap_or(1234),
        local_port: matches.get_one::<u16>("cli-port").copied().unwrap_or(1235),
        streams: matches.get_one::<u8>("streams").copied().unwrap_or(1),
        check_md5: matches.get_flag("check-md5"),
        trust,
        mode: if matches.get_flag("mmap") {
            WriteMode::Mapped
        } else {
            WriteMode::Direct
        },
        writers: matches.get_one::<usize>("writers").copied().unwrap_or(4),
    };

    Ok(Invocation {
        options,
        src_folder,
        filename: matches
            .get_one::<String>("filename")
            .cloned()
            .unwrap_or_default(),
        dst_folder,
    })
}

fn exit_code_for(err: &TransferError) -> ExitCode {
    match err {
        TransferError::Config(_) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

/// Parses `args` and runs one transfer to completion.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(2);
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let invocation = match parse(&matches) {
        Ok(invocation) => invocation,
        Err(err) => {
            error!("{err}");
            return exit_code_for(&err);
        }
    };

    let client = match Client::new(invocation.options) {
        Ok(client) => client,
        Err(err) => {
            error!("{err}");
            return exit_code_for(&err);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start the runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(client.transfer(
        &invocation.src_folder,
        &invocation.filename,
        &invocation.dst_folder,
    )) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("transfer failed: {err}");
            exit_code_for(&err)
        }
    }
}
