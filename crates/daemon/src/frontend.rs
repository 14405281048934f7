//! The `qftd` entry point: flag parsing, logging, runtime.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::server::{FileServer, ServerOptions};

fn command() -> Command {
    Command::new("qftd")
        .about("Serves files over parallel QUIC streams.")
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("ADDR")
                .default_value("127.0.0.1")
                .help("Address to bind the UDP listener on."),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .default_value("1234")
                .help("UDP port to listen on."),
        )
        .arg(
            Arg::new("cert")
                .long("cert")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .requires("key")
                .help("PEM certificate chain; self-signed material is generated when omitted."),
        )
        .arg(
            Arg::new("key")
                .long("key")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .requires("cert")
                .help("PEM private key for --cert."),
        )
        .arg(
            Arg::new("org")
                .long("org")
                .value_name("NAME")
                .default_value("qft")
                .action(ArgAction::Set)
                .help("Organization name stamped into generated certificates."),
        )
}

/// Parses `args`, binds the server and serves until the process is killed.
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

    let options = ServerOptions {
        host: matches
            .get_one::<String>("host")
            .cloned()
            .unwrap_or_default(),
        port: matches.get_one::<u16>("port").copied().unwrap_or(1234),
        cert: matches.get_one::<PathBuf>("cert").cloned(),
        key: matches.get_one::<PathBuf>("key").cloned(),
        org: matches.get_one::<String>("org").cloned().unwrap_or_default(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start the runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let server = match FileServer::bind(&options) {
            Ok(server) => server,
            Err(err) => {
                error!("failed to bind: {err}");
                return ExitCode::FAILURE;
            }
        };
        server.serve().await;
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_flags() {
        let matches = command()
            .try_get_matches_from(["qftd"])
            .expect("bare invocation parses");
        assert_eq!(matches.get_one::<String>("host").unwrap(), "127.0.0.1");
        assert_eq!(matches.get_one::<u16>("port").copied(), Some(1234));
        assert!(matches.get_one::<PathBuf>("cert").is_none());
    }

    #[test]
    fn cert_and_key_must_travel_together() {
        assert!(
            command()
                .try_get_matches_from(["qftd", "--cert", "/tmp/c.pem"])
                .is_err()
        );
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(command().try_get_matches_from(["qftd", "--frobnicate"]).is_err());
    }
}
