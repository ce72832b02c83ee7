use htx_core::logging;

mod cli;

use crate::cli::CliCommand;

fn main() {
    // Initialize logging as early as possible; logging::init falls back
    // to stderr on its own when the state dir is unwritable.
    logging::init();

    if let Err(err) = CliCommand::run_from_args() {
        eprintln!("htx error: {:#}", err);
        std::process::exit(1);
    }
}
