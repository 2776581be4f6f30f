//! process-helpers - run executables with captured output
//!
//! - `process-helpers run <FILE> [ARGUMENTS]` runs a process and prints what
//!   it wrote to stdout and stderr
//! - `process-helpers chmod <PATH>` marks a file executable on Unix

mod cli;

use clap::Parser;
use cli::{exit_codes, Cli, Commands};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = process_helpers::logging::init(cli.verbose, cli.json_output) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    let result = match cli.command {
        Commands::Run(args) => cli::run(args),
        Commands::Chmod(args) => cli::chmod(args),
    };

    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            cli::exit_code_for(&e)
        }
    }
}
