#![deny(unsafe_code)]

use std::{env, process::ExitCode};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    qft_cli::run(env::args_os())
}
